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

//! Per-request metadata handed from a listener to the resolver pipeline.

use crate::ecs;
use bytes::Bytes;
use domain::base::Message;
use std::{
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// The listener kind a query arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Plain UDP datagrams.
    Udp,
    /// TCP with two-byte length framing.
    Tcp,
    /// DNS over TLS.
    Tls,
    /// DNS over HTTPS.
    Https {
        /// The parsed `X-Forwarded-For` chain, first hop first. Empty when
        /// the header was absent.
        forwarded_for: Vec<IpAddr>,
    },
}

/// An in-flight request: the decoded query plus its client metadata.
#[derive(Clone)]
pub struct RequestContext {
    /// The decoded query message.
    pub query: Message<Bytes>,
    /// The socket peer the query was received from.
    pub peer: SocketAddr,
    /// The listener kind the query arrived on.
    pub transport: Transport,
    id: u64,
}

impl RequestContext {
    /// Wrap a decoded query. Each context is assigned the next value of a
    /// process-wide monotonic counter for log correlation.
    pub fn new(query: Message<Bytes>, peer: SocketAddr, transport: Transport) -> Self {
        Self {
            query,
            peer,
            transport,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The monotonically assigned request id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The effective client address. For HTTPS with `trust_forwarded` set,
    /// the last public hop of `X-Forwarded-For` is preferred; in every other
    /// case the socket peer is authoritative.
    pub fn client_ip(&self, trust_forwarded: bool) -> IpAddr {
        if trust_forwarded {
            if let Transport::Https { forwarded_for } = &self.transport {
                if let Some(ip) = forwarded_for.iter().rev().find(|ip| ecs::is_global(**ip)) {
                    return *ip;
                }
            }
        }
        self.peer.ip()
    }
}
