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

//! Do53 upstream speaking plain UDP.

use super::{Result, Upstream};
use crate::MAX_LEN;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use domain::base::Message;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// An upstream exchanging queries over plain UDP with a fresh local socket
/// per exchange.
pub struct Udp {
    addr: SocketAddr,
    addr_str: String,
}

impl Udp {
    /// Create a new UDP upstream with the given remote server address.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr_str: addr.to_string(),
            addr,
        }
    }
}

fn bind_addr(is_ipv4: bool) -> SocketAddr {
    if is_ipv4 {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    }
}

#[async_trait]
impl Upstream for Udp {
    async fn exchange(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>> {
        let socket = UdpSocket::bind(bind_addr(self.addr.is_ipv4())).await?;
        socket.connect(self.addr).await?;

        // Randomnize the message id on the wire
        let mut wire = Message::from_octets(BytesMut::from(msg.as_slice()))?;
        wire.header_mut().set_random_id();
        let wire = wire.for_slice();

        socket.send(wire.as_slice()).await?;

        loop {
            let mut buf = BytesMut::with_capacity(MAX_LEN);
            buf.resize(MAX_LEN, 0);
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);

            // We ignore garbage since there is a timer on this whole thing.
            let answer = match Message::from_octets(buf.freeze()) {
                Ok(answer) => answer,
                Err(_) => continue,
            };
            if !answer.is_answer(&wire) {
                continue;
            }
            return Ok(answer);
        }
    }

    fn address(&self) -> &str {
        &self.addr_str
    }
}
