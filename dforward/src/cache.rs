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

//! The two-tier response cache. [`RespCache`] is the general cache keyed by
//! question; [`SubnetCache`] partitions entries additionally by the client
//! network so that geo-targeted answers never leak across subnets. Both tiers
//! clamp record TTLs on insert and serve deep copies with the remaining TTLs
//! and the reader's message id written in.

use crate::{
    ecs::mask_ip,
    message::{has_soa, map_ttls, min_ttl, with_id},
    MAX_TTL,
};
use bytes::Bytes;
use clru::CLruCache;
use domain::base::{
    iana::{Rcode, Rtype},
    name::ToDname,
    question::Question,
    Dname, Message,
};
use log::debug;
use std::{
    net::IpAddr,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// TTL clamping bounds applied on insert. A zero bound is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlBounds {
    /// Records are cached for at least this many seconds; 0 disables the floor.
    pub min_ttl: u32,
    /// Records are cached for at most this many seconds; 0 disables the ceiling.
    pub max_ttl: u32,
}

impl TtlBounds {
    fn clamp(&self, mut ttl: u32) -> u32 {
        if self.max_ttl != 0 && ttl > self.max_ttl {
            ttl = self.max_ttl;
        }
        if self.min_ttl != 0 && ttl < self.min_ttl {
            ttl = self.min_ttl;
        }
        ttl
    }
}

// Name equality and hashing of `Dname` are case-insensitive, so two queries
// differing only in case share an entry.
type Key = Question<Dname<Bytes>>;

fn key_of(msg: &Message<Bytes>) -> Option<Key> {
    let question = msg.first_question()?;
    Some(
        (
            question.qname().to_bytes(),
            question.qtype(),
            question.qclass(),
        )
            .into(),
    )
}

// Only positive responses are worth keeping: NoError with answers, or
// NXDomain backed by an SOA. SERVFAIL and friends always go back upstream,
// and ANY responses are never cached.
fn cachable(msg: &Message<Bytes>) -> bool {
    match msg.first_question() {
        Some(q) if q.qtype() == Rtype::Any => return false,
        Some(_) => {}
        None => return false,
    }
    match msg.header().rcode() {
        Rcode::NoError => msg.header_counts().ancount() > 0,
        Rcode::NXDomain => has_soa(msg),
        _ => false,
    }
}

struct CacheRecord {
    created: Instant,
    // TTLs inside are already clamped.
    msg: Message<Bytes>,
    expiry: Duration,
}

impl CacheRecord {
    fn new(msg: Message<Bytes>) -> Self {
        let expiry = Duration::from_secs(u64::from(min_ttl(&msg).unwrap_or(MAX_TTL)));
        Self {
            created: Instant::now(),
            msg,
            expiry,
        }
    }

    fn expired(&self) -> bool {
        Instant::now().saturating_duration_since(self.created) > self.expiry
    }

    // Deep copy with the remaining TTLs and the reader's id, `None` once
    // expired.
    fn refresh(&self, id: u16) -> Option<Message<Bytes>> {
        let elapsed = Instant::now().saturating_duration_since(self.created);
        if elapsed > self.expiry {
            return None;
        }
        let secs = elapsed.as_secs() as u32;
        map_ttls(&self.msg, |ttl| ttl.saturating_sub(secs))
            .and_then(|m| with_id(&m, id))
            .ok()
    }
}

/// The general response cache, an LRU keyed by (qname, qtype, qclass).
#[derive(Clone)]
pub struct RespCache {
    cache: Arc<Mutex<CLruCache<Key, CacheRecord>>>,
    bounds: TtlBounds,
}

impl RespCache {
    /// Create a cache with the given LRU capacity and TTL bounds.
    pub fn new(size: NonZeroUsize, bounds: TtlBounds) -> Self {
        Self {
            cache: Arc::new(Mutex::new(CLruCache::new(size))),
            bounds,
        }
    }

    /// Store a response if it is worth keeping, clamping its TTLs.
    pub fn put(&self, msg: &Message<Bytes>) {
        if !cachable(msg) {
            debug!("response not cachable, skipping insert");
            return;
        }
        let key = match key_of(msg) {
            Some(key) => key,
            None => return,
        };
        let clamped = match map_ttls(msg, |ttl| self.bounds.clamp(ttl)) {
            Ok(m) => m,
            Err(_) => return,
        };
        self.cache
            .lock()
            .unwrap()
            .put(key, CacheRecord::new(clamped));
    }

    /// Serve a copy of the cached response for the query, with remaining
    /// TTLs and the query's id. Expired entries are invisible and reclaimed.
    pub fn get(&self, query: &Message<Bytes>) -> Option<Message<Bytes>> {
        let key = key_of(query)?;
        let id = query.header().id();
        let mut cache = self.cache.lock().unwrap();
        match cache.get(&key).map(|r| r.refresh(id)) {
            Some(Some(m)) => {
                debug!("cache hit for {}", key.qname());
                Some(m)
            }
            Some(None) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }
}

struct SubnetRecord {
    network: IpAddr,
    mask: u8,
    record: CacheRecord,
}

/// The subnet-partitioned cache: per-question ordered entries keyed by the
/// client network, served by longest-prefix match.
#[derive(Clone)]
pub struct SubnetCache {
    cache: Arc<Mutex<CLruCache<Key, Vec<SubnetRecord>>>>,
    bounds: TtlBounds,
}

impl SubnetCache {
    /// Create a cache with the given LRU capacity and TTL bounds.
    pub fn new(size: NonZeroUsize, bounds: TtlBounds) -> Self {
        Self {
            cache: Arc::new(Mutex::new(CLruCache::new(size))),
            bounds,
        }
    }

    /// Store a response under the network `ip/mask`, usually the scope the
    /// upstream declared for it.
    pub fn put(&self, msg: &Message<Bytes>, ip: IpAddr, mask: u8) {
        if !cachable(msg) {
            debug!("response not cachable, skipping subnet insert");
            return;
        }
        let key = match key_of(msg) {
            Some(key) => key,
            None => return,
        };
        let clamped = match map_ttls(msg, |ttl| self.bounds.clamp(ttl)) {
            Ok(m) => m,
            Err(_) => return,
        };
        let network = mask_ip(ip, mask);
        let record = CacheRecord::new(clamped);

        let mut cache = self.cache.lock().unwrap();
        if let Some(entries) = cache.get_mut(&key) {
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.mask == mask && e.network == network)
            {
                entry.record = record;
            } else {
                entries.push(SubnetRecord {
                    network,
                    mask,
                    record,
                });
            }
        } else {
            cache.put(
                key,
                vec![SubnetRecord {
                    network,
                    mask,
                    record,
                }],
            );
        }
    }

    /// Serve a copy of the cached response whose network contains the client,
    /// preferring the longest prefix, together with the mask that matched.
    pub fn get(&self, query: &Message<Bytes>, ip: IpAddr) -> Option<(Message<Bytes>, u8)> {
        let key = key_of(query)?;
        let id = query.header().id();
        let mut cache = self.cache.lock().unwrap();
        let entries = cache.get_mut(&key)?;
        entries.retain(|e| !e.record.expired());
        let best = entries
            .iter()
            .filter(|e| mask_ip(ip, e.mask) == e.network)
            .max_by_key(|e| e.mask)?;
        let matched = best.mask;
        let msg = best.record.refresh(id)?;
        debug!("subnet cache hit for {} under /{}", key.qname(), matched);
        Some((msg, matched))
    }
}
