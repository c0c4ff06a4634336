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

#![deny(missing_docs)]
#![deny(unsafe_code)]
// Documentation
//! This is the core library for dproxy. It implements the request-resolution
//! engine of a multi-protocol DNS forwarding proxy: per-domain routing with
//! longest-suffix matching, a two-tier response cache (general and
//! subnet-partitioned), an RTT-aware upstream dispatcher with a fallback
//! pool, EDNS Client Subnet handling, and the listener lifecycle.

pub mod cache;
pub mod context;
pub mod ecs;
pub mod error;
mod message;
#[doc(hidden)]
pub mod mock;
pub mod proxy;
pub mod resolver;
pub mod table;
pub mod upstreams;

pub use self::{
    context::{RequestContext, Transport},
    proxy::Proxy,
    resolver::{Resolver, ResolverConfig},
    table::{RouteEntry, RouteTable},
    upstreams::{Upstream, Upstreams},
};

/// Size of the buffers for DNS messages on the wire and for message
/// reconstruction.
pub const MAX_LEN: usize = 4096;

// Maximum TTL as defined in https://tools.ietf.org/html/rfc2181, 2147483647
//   Setting this to a value of 1 day, in seconds
pub(crate) const MAX_TTL: u32 = 86400_u32;
