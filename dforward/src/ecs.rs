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

//! EDNS Client Subnet handling per RFC 7871: attaching a truncated client
//! network to outgoing queries, reading the scope an upstream declared, and
//! stripping the option from client-facing responses.

use crate::{error::Result, MAX_LEN};
use bytes::{Bytes, BytesMut};
use domain::{
    base::{
        opt::{AllOptData, ClientSubnet},
        Message, MessageBuilder,
    },
    rdata::AllRecordData,
};
use std::net::IpAddr;

/// The canonical source prefix emitted for IPv4 clients (family 1).
pub const V4_SOURCE_PREFIX: u8 = 24;
/// The canonical source prefix emitted for IPv6 clients (family 2).
pub const V6_SOURCE_PREFIX: u8 = 56;

/// The canonical source prefix for an address family.
pub fn source_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => V4_SOURCE_PREFIX,
        IpAddr::V6(_) => V6_SOURCE_PREFIX,
    }
}

/// Whether an address is routable on the public Internet. Private, loopback,
/// link-local, broadcast and unspecified addresses never leave the proxy
/// inside an ECS option.
// TODO: use ip.is_global() instead once stabilized
pub fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            !ip.is_private()
                && !ip.is_broadcast()
                && !ip.is_link_local()
                && !ip.is_loopback()
                && !ip.is_unspecified()
        }
        IpAddr::V6(ip) => {
            let seg0 = ip.segments()[0];
            !ip.is_loopback()
                && !ip.is_unspecified()
                // unique-local, fc00::/7
                && (seg0 & 0xfe00) != 0xfc00
                // link-local, fe80::/10
                && (seg0 & 0xffc0) != 0xfe80
        }
    }
}

/// Zero out the host bits of an address, keeping `prefix` leading bits.
pub fn mask_ip(ip: IpAddr, prefix: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let prefix = u32::from(prefix.min(32));
            let bits = if prefix == 0 {
                0
            } else {
                u32::from(v4) & (u32::MAX << (32 - prefix))
            };
            IpAddr::V4(bits.into())
        }
        IpAddr::V6(v6) => {
            let prefix = u32::from(prefix.min(128));
            let bits = if prefix == 0 {
                0
            } else {
                u128::from(v6) & (u128::MAX << (128 - prefix))
            };
            IpAddr::V6(bits.into())
        }
    }
}

/// Rebuild the query with a single OPT record carrying exactly one ECS option
/// for the client network, truncated to the canonical source prefix with
/// scope zero. Any ECS option already present is replaced; all other OPT
/// options are preserved. Returns the rebuilt message and the applied source
/// mask.
pub fn attach_subnet(msg: &Message<Bytes>, ip: IpAddr) -> Result<(Message<Bytes>, u8)> {
    let source_prefix_len = source_prefix(ip);
    // Copy all the questions and headers here.
    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN))?;
    *builder.header_mut() = msg.header();
    let mut builder = builder.question();
    for item in msg.question().flatten() {
        builder.push(item)?;
    }
    let mut builder = builder.additional();
    // Per RFC 6891
    // The OPT RR MAY be placed anywhere within the additional data section.
    // When an OPT RR is included within any DNS message, it MUST be the
    // only OPT RR in that message.

    // Whether we have already seen an OPT record.
    let mut flag = false;
    for item in msg.additional()? {
        if let Some(record) = item?.into_record::<AllRecordData<_, _>>()? {
            match (record.data(), flag) {
                (AllRecordData::Opt(opt), false) => {
                    builder.opt(|builder| {
                        for option in opt.iter::<AllOptData<_>>() {
                            let option = option.map_err(|_| domain::base::ShortBuf)?;
                            if let AllOptData::ClientSubnet(_) = option {
                                // The client-sent network is replaced with ours
                            } else {
                                builder.push(&option)?
                            }
                        }
                        ClientSubnet::push(builder, source_prefix_len, 0, ip)?;
                        Ok(())
                    })?;
                    flag = true
                }
                (AllRecordData::Opt(_), true) => {} // A second OPT record is dropped
                (_, _) => {
                    builder.push(record)?;
                }
            }
        }
    }
    // A query without EDNS at all still gets an OPT with our option.
    if !flag {
        builder.opt(|builder| ClientSubnet::push(builder, source_prefix_len, 0, ip))?;
    }
    Ok((builder.into_message(), source_prefix_len))
}

/// Extract the ECS option: `(address, source mask, scope mask)`.
pub fn parse_subnet(msg: &Message<Bytes>) -> Option<(IpAddr, u8, u8)> {
    let opt = msg.opt()?;
    for option in opt.as_opt().iter::<AllOptData<Bytes>>() {
        if let Ok(AllOptData::ClientSubnet(cs)) = option {
            return Some((cs.addr(), cs.source_prefix_len(), cs.scope_prefix_len()));
        }
    }
    None
}

/// Rebuild the message without its ECS option. The OPT record itself and its
/// other options survive; a message without OPT is returned unchanged.
pub fn strip_subnet(msg: &Message<Bytes>) -> Result<Message<Bytes>> {
    let opt = match msg.opt() {
        Some(opt) => opt,
        None => return Ok(msg.clone()),
    };
    let mut kept = Vec::new();
    for option in opt.as_opt().iter::<AllOptData<Bytes>>() {
        let option = option?;
        if !matches!(option, AllOptData::ClientSubnet(_)) {
            kept.push(option);
        }
    }

    let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(MAX_LEN))?;
    *builder.header_mut() = msg.header();

    let mut builder = builder.question();
    for item in msg.question().flatten() {
        builder.push(item)?;
    }

    let mut builder = builder.answer();
    for item in msg.answer()? {
        if let Some(record) = item?.into_record::<AllRecordData<_, _>>()? {
            builder.push(record)?;
        }
    }

    let mut builder = builder.authority();
    for item in msg.authority()? {
        if let Some(record) = item?.into_record::<AllRecordData<_, _>>()? {
            builder.push(record)?;
        }
    }

    let mut builder = builder.additional();
    for item in msg.additional()? {
        if let Some(record) = item?.into_record::<AllRecordData<_, _>>()? {
            if !matches!(record.data(), AllRecordData::Opt(_)) {
                builder.push(record)?;
            }
        }
    }
    builder.opt(|builder| {
        for option in &kept {
            builder.push(option)?
        }
        Ok(())
    })?;

    Ok(builder.into_message())
}

#[cfg(test)]
mod tests {
    use super::{attach_subnet, is_global, mask_ip, parse_subnet, strip_subnet};
    use bytes::{Bytes, BytesMut};
    use domain::base::{
        octets::ParseError,
        opt::{AllOptData, ClientSubnet, Cookie},
        MessageBuilder,
    };
    use std::net::IpAddr;

    #[test]
    fn overwrite_subnet() {
        // First of all, we should overwrite all ECS option. i.e. Remove all ECS options and add our own.
        // Second of all, we should only push back one OPT record.
        let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(1024))
            .unwrap()
            .additional();
        builder
            .opt(|opt| {
                ClientSubnet::push(opt, 32, 0, "1.1.1.1".parse().unwrap())?;
                opt.push(&AllOptData::<Bytes>::Cookie(Cookie::new([7; 8])))?;
                Ok(())
            })
            .unwrap();
        builder
            .opt(|opt| ClientSubnet::push(opt, 24, 0, "1.1.1.1".parse().unwrap()))
            .unwrap();
        let msg = builder.into_message();

        let (msg, mask) = attach_subnet(&msg, "9.9.9.9".parse().unwrap()).unwrap();
        assert_eq!(mask, 24);
        let v = msg
            .opt()
            .unwrap()
            .as_opt()
            .iter::<AllOptData<Bytes>>()
            .collect::<Result<Vec<AllOptData<Bytes>>, ParseError>>()
            .unwrap();
        assert_eq!(v.len(), 2);
        // AllOptData doesn't implement debug
        match v[0] {
            AllOptData::Cookie(cookie) => {
                assert_eq!(cookie.cookie(), [7; 8]);
            }
            _ => unreachable!(),
        };
        match v[1] {
            AllOptData::ClientSubnet(cs) => {
                assert_eq!(cs.source_prefix_len(), 24);
                assert_eq!(cs.scope_prefix_len(), 0);
                assert_eq!(cs.addr(), "9.9.9.0".parse::<IpAddr>().unwrap());
            }
            _ => unreachable!(),
        };
    }

    #[test]
    fn attach_without_edns() {
        // Even if the query has no OPT record, one is added for our option.
        let builder = MessageBuilder::from_target(BytesMut::with_capacity(1024)).unwrap();
        let msg = builder.into_message();

        let (msg, mask) = attach_subnet(&msg, "2001:db8::1".parse().unwrap()).unwrap();
        assert_eq!(mask, 56);
        assert_eq!(
            parse_subnet(&msg),
            Some(("2001:db8::".parse().unwrap(), 56, 0))
        );
    }

    #[test]
    fn strip_keeps_other_options() {
        let mut builder = MessageBuilder::from_target(BytesMut::with_capacity(1024))
            .unwrap()
            .additional();
        builder
            .opt(|opt| {
                ClientSubnet::push(opt, 24, 0, "9.9.9.0".parse().unwrap())?;
                opt.push(&AllOptData::<Bytes>::Cookie(Cookie::new([7; 8])))?;
                Ok(())
            })
            .unwrap();
        let msg = builder.into_message();

        let stripped = strip_subnet(&msg).unwrap();
        assert_eq!(parse_subnet(&stripped), None);
        let v = stripped
            .opt()
            .unwrap()
            .as_opt()
            .iter::<AllOptData<Bytes>>()
            .collect::<Result<Vec<AllOptData<Bytes>>, ParseError>>()
            .unwrap();
        assert_eq!(v.len(), 1);
        match v[0] {
            AllOptData::Cookie(cookie) => assert_eq!(cookie.cookie(), [7; 8]),
            _ => unreachable!(),
        };
    }

    #[test]
    fn global_classification() {
        for local in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.0.1",
            "0.0.0.0",
            "::1",
            "::",
            "fe80::1",
            "fc00::1",
            "fd12::1",
        ] {
            assert!(!is_global(local.parse().unwrap()), "{}", local);
        }
        for global in ["8.8.8.8", "1.1.1.1", "2001:4860:4860::8888"] {
            assert!(is_global(global.parse().unwrap()), "{}", global);
        }
    }

    #[test]
    fn masking() {
        assert_eq!(
            mask_ip("1.2.3.4".parse().unwrap(), 24),
            "1.2.3.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            mask_ip("1.2.3.4".parse().unwrap(), 0),
            "0.0.0.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            mask_ip("1.2.3.4".parse().unwrap(), 32),
            "1.2.3.4".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            mask_ip("2001:db8:aaaa:bbbb:cccc::1".parse().unwrap(), 56),
            "2001:db8:aaaa:bb00::".parse::<IpAddr>().unwrap()
        );
    }
}
