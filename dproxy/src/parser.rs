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

use log::LevelFilter;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
#[serde(remote = "LevelFilter")]
enum LevelFilterDef {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn default_timeout() -> u64 {
    5
}

fn default_cache_size() -> usize {
    4096
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamConf {
    /// Plain DNS over UDP, e.g. `udp: 8.8.8.8:53`
    Udp(SocketAddr),
    /// Plain DNS over TCP, e.g. `tcp: 8.8.8.8:53`
    Tcp(SocketAddr),
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReservedConf {
    /// Suffixes this block applies to. The empty string overrides the
    /// default upstream list for otherwise unreserved names.
    pub domains: Vec<String>,
    /// Upstreams reserved for the suffixes.
    #[serde(default)]
    pub upstreams: Vec<UpstreamConf>,
    /// The `#` marker: answer names under the suffixes with an empty
    /// positive response instead of forwarding.
    #[serde(default)]
    pub unresolvable: bool,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CacheConf {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_size")]
    pub size: usize,
    #[serde(default)]
    pub min_ttl: u32,
    #[serde(default)]
    pub max_ttl: u32,
}

impl Default for CacheConf {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_cache_size(),
            min_ttl: 0,
            max_ttl: 0,
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Parsed {
    #[serde(with = "LevelFilterDef")]
    pub verbosity: LevelFilter,
    pub address: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub enable_ecs: bool,
    #[serde(default)]
    pub refuse_any: bool,
    #[serde(default)]
    pub trust_forwarded: bool,
    #[serde(default)]
    pub cache: CacheConf,
    pub upstreams: Vec<UpstreamConf>,
    #[serde(default)]
    pub fallbacks: Vec<UpstreamConf>,
    #[serde(default)]
    pub reserved: Vec<ReservedConf>,
}
