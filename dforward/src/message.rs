// Copyright 2024 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Message reconstruction helpers shared by the cache, the ECS codec, and the
// resolver pipeline.

use crate::{error::Result, MAX_LEN};
use bytes::{Bytes, BytesMut};
use domain::{
    base::{iana::Rcode, iana::Rtype, Message, MessageBuilder},
    rdata::AllRecordData,
};

// An empty answer to the query carrying the given response code. The id and
// the question of the query are preserved.
pub(crate) fn respond(query: &Message<Bytes>, rcode: Rcode) -> Result<Message<Bytes>> {
    let mut builder =
        MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN))?.start_answer(query, rcode)?;
    builder.header_mut().set_ra(true);
    Ok(builder.into_message())
}

// A copy of the message with the id replaced.
pub(crate) fn with_id(msg: &Message<Bytes>, id: u16) -> Result<Message<Bytes>> {
    let mut msg = Message::from_octets(BytesMut::from(msg.as_slice()))?;
    msg.header_mut().set_id(id);
    Ok(Message::from_octets(msg.into_octets().freeze())?)
}

// A copy of the message with every record TTL passed through `f`. The OPT
// pseudo-record is exempt since its TTL field carries flags.
pub(crate) fn map_ttls(msg: &Message<Bytes>, f: impl Fn(u32) -> u32) -> Result<Message<Bytes>> {
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN))?;
    *builder.header_mut() = msg.header();

    let mut builder = builder.question();
    for item in msg.question().flatten() {
        builder.push(item)?;
    }

    let mut builder = builder.answer();
    for item in msg.answer()? {
        if let Some(mut record) = item?.into_record::<AllRecordData<_, _>>()? {
            record.set_ttl(f(record.ttl()));
            builder.push(record)?;
        }
    }

    let mut builder = builder.authority();
    for item in msg.authority()? {
        if let Some(mut record) = item?.into_record::<AllRecordData<_, _>>()? {
            record.set_ttl(f(record.ttl()));
            builder.push(record)?;
        }
    }

    let mut builder = builder.additional();
    for item in msg.additional()? {
        if let Some(mut record) = item?.into_record::<AllRecordData<_, _>>()? {
            if !matches!(record.data(), AllRecordData::Opt(_)) {
                record.set_ttl(f(record.ttl()));
            }
            builder.push(record)?;
        }
    }

    Ok(builder.into_message())
}

// The smallest TTL across all real records, or `None` for a record-less
// message.
pub(crate) fn min_ttl(msg: &Message<Bytes>) -> Option<u32> {
    let mut min = None;
    for section in [msg.answer(), msg.authority(), msg.additional()] {
        let section = match section {
            Ok(s) => s,
            Err(_) => continue,
        };
        for item in section.flatten() {
            if item.rtype() == Rtype::Opt {
                continue;
            }
            min = Some(match min {
                Some(m) if m < item.ttl() => m,
                _ => item.ttl(),
            });
        }
    }
    min
}

// Whether the authority section carries an SOA record.
pub(crate) fn has_soa(msg: &Message<Bytes>) -> bool {
    msg.authority()
        .map(|section| section.flatten().any(|r| r.rtype() == Rtype::Soa))
        .unwrap_or(false)
}
