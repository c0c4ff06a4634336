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

//! This module is NOT intended to be used by regular users. It is used for mocking purpose only.

use crate::{error::Result, MAX_LEN};
use bytes::{Bytes, BytesMut};
use domain::{
    base::{iana::Rcode, Dname, Message, MessageBuilder},
    rdata::A,
};
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;

/// Mock DNS server answering every query with a single fixed A record.
pub struct Server {
    socket: UdpSocket,
    name: Dname<Bytes>,
    ttl: u32,
    addr: Ipv4Addr,
}

impl Server {
    /// Create a new mock server on a bound socket.
    pub fn new(socket: UdpSocket, name: Dname<Bytes>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self {
            socket,
            name,
            ttl,
            addr,
        }
    }

    /// Serve queries forever.
    pub async fn run(self) -> Result<()> {
        loop {
            let mut buf = BytesMut::with_capacity(MAX_LEN);
            buf.resize(MAX_LEN, 0);
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(len);

            let query = match Message::from_octets(buf.freeze()) {
                Ok(query) => query,
                Err(_) => continue,
            };
            let resp = self.respond(&query)?;
            self.socket.send_to(resp.as_slice(), peer).await?;
        }
    }

    fn respond(&self, query: &Message<Bytes>) -> Result<Message<Bytes>> {
        let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN))?
            .start_answer(query, Rcode::NoError)?;
        builder.push((self.name.clone(), self.ttl, A::new(self.addr)))?;
        Ok(builder.into_message())
    }
}
