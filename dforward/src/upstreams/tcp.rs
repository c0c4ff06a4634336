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

//! Do53 upstream speaking TCP with two-byte length framing per RFC 1035.

use super::{Result, Upstream};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use domain::base::Message;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// An upstream exchanging queries over a fresh TCP connection per exchange.
pub struct Tcp {
    addr: SocketAddr,
    addr_str: String,
}

impl Tcp {
    /// Create a new TCP upstream with the given remote server address.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr_str: addr.to_string(),
            addr,
        }
    }
}

#[async_trait]
impl Upstream for Tcp {
    async fn exchange(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>> {
        let mut stream = TcpStream::connect(self.addr).await?;

        let mut wire = Message::from_octets(BytesMut::from(msg.as_slice()))?;
        wire.header_mut().set_random_id();

        stream.write_u16(wire.as_slice().len() as u16).await?;
        stream.write_all(wire.as_slice()).await?;
        stream.flush().await?;

        loop {
            let len = stream.read_u16().await? as usize;
            let mut buf = BytesMut::with_capacity(len);
            buf.resize(len, 0);
            stream.read_exact(&mut buf).await?;

            let answer = match Message::from_octets(buf.freeze()) {
                Ok(answer) => answer,
                Err(_) => continue,
            };
            if !answer.is_answer(&wire.for_slice()) {
                continue;
            }
            return Ok(answer);
        }
    }

    fn address(&self) -> &str {
        &self.addr_str
    }
}
