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

//! `Upstream` is the capability a resolver dispatches queries to; it is
//! method (UDP, TCP, DoT, DoH, etc.) agnostic. `Upstreams` is the dispatcher
//! that orders a set of upstreams by observed round-trip time, walks it
//! sequentially under a per-attempt timeout, and races a fallback pool once
//! the whole set has failed.

pub mod tcp;
pub mod udp;

pub use self::{tcp::Tcp, udp::Udp};

use async_trait::async_trait;
use bytes::Bytes;
use domain::base::{octets::ParseError, Message, ShortBuf};
use futures::future::{select_ok, FutureExt};
use log::{debug, warn};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::time::{error::Elapsed, timeout};

/// A shorthand for returning upstream errors.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// UpstreamError enumerates all possible errors of the dispatcher and of the
/// bundled transports.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// IO Error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error forwarded from `tokio::time::error`. This indicates a timeout probably.
    #[error(transparent)]
    Timeout(#[from] Elapsed),

    /// The message buffer was too short.
    #[error(transparent)]
    ShortBuf(#[from] ShortBuf),

    /// The reply failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Every primary and fallback upstream failed for the query.
    #[error("every configured upstream failed for the query")]
    AllFailed,
}

/// An upstream resolver: anything that can exchange a DNS query for a reply
/// and has a stable address string identifying it in the RTT bookkeeping.
/// Implementations are immutable after registration; the bundled ones are
/// [`Udp`] and [`Tcp`], while DoT/DoH clients live outside this crate.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send the query and await the reply.
    async fn exchange(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>>;

    /// The stable identity used as the RTT bookkeeping key.
    fn address(&self) -> &str;
}

// Round-trip bookkeeping. An address without a measurement sorts as zero,
// before any measured value. Concurrent overwrites with slightly stale values
// are fine; the sort only needs a monotone tendency toward the true RTT.
#[derive(Clone, Default)]
struct RttTable {
    inner: Arc<Mutex<HashMap<String, Duration>>>,
}

impl RttTable {
    fn record(&self, addr: &str, rtt: Duration) {
        self.inner.lock().unwrap().insert(addr.to_owned(), rtt);
    }

    fn get(&self, addr: &str) -> Duration {
        self.inner
            .lock()
            .unwrap()
            .get(addr)
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// The dispatcher over upstream sets: RTT-sorted sequential attempts with a
/// raced fallback pool. Cloning shares the RTT bookkeeping.
#[derive(Clone)]
pub struct Upstreams {
    rtt: RttTable,
    timeout: Duration,
}

impl Upstreams {
    /// Create a dispatcher with the given per-upstream exchange timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            rtt: RttTable::default(),
            timeout,
        }
    }

    /// The latest recorded round trip for an address; zero when unknown.
    pub fn rtt(&self, addr: &str) -> Duration {
        self.rtt.get(addr)
    }

    /// Exchange the query against the primary set, then the fallback pool.
    ///
    /// The primary set is walked sequentially in ascending order of recorded
    /// RTT (the sort is stable, so upstreams without a measurement keep their
    /// configured order and precede measured ones); each attempt is bounded
    /// by the per-upstream timeout and a success records its elapsed time.
    /// Only once every primary upstream has failed is the fallback pool
    /// consulted: fallbacks are raced concurrently in configured order
    /// without RTT bookkeeping, first success wins.
    pub async fn exchange(
        &self,
        msg: &Message<Bytes>,
        primary: &[Arc<dyn Upstream>],
        fallbacks: &[Arc<dyn Upstream>],
    ) -> Result<Message<Bytes>> {
        let mut ordered = primary.to_vec();
        ordered.sort_by_key(|u| self.rtt.get(u.address()));

        for u in &ordered {
            let started = Instant::now();
            match timeout(self.timeout, u.exchange(msg)).await {
                Ok(Ok(reply)) => {
                    let elapsed = started.elapsed();
                    self.rtt.record(u.address(), elapsed);
                    debug!(
                        "upstream {} replied in {} ms",
                        u.address(),
                        elapsed.as_millis()
                    );
                    return Ok(reply);
                }
                Ok(Err(e)) => warn!("upstream {} failed: {}", u.address(), e),
                Err(_) => warn!("upstream {} timed out", u.address()),
            }
        }

        if fallbacks.is_empty() {
            return Err(UpstreamError::AllFailed);
        }

        warn!("every primary upstream failed, racing the fallback pool");
        let attempts = fallbacks
            .iter()
            .map(|u| {
                let u = u.clone();
                let msg = msg.clone();
                let per_attempt = self.timeout;
                async move { timeout(per_attempt, async move { u.exchange(&msg).await }).await? }
                    .boxed()
            })
            .collect::<Vec<_>>();
        match select_ok(attempts).await {
            Ok((reply, _)) => Ok(reply),
            Err(e) => {
                warn!("every fallback upstream failed as well, last error: {}", e);
                Err(UpstreamError::AllFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Result, Upstream, UpstreamError, Upstreams};
    use async_trait::async_trait;
    use bytes::Bytes;
    use domain::base::Message;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    fn dummy_msg() -> Message<Bytes> {
        Message::from_octets(Bytes::from_static(&[0u8; 12])).unwrap()
    }

    struct Mock {
        addr: &'static str,
        hits: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    impl Mock {
        fn answering(addr: &'static str) -> Arc<Self> {
            Arc::new(Self {
                addr,
                hits: AtomicUsize::new(0),
                delay: None,
                fail: false,
            })
        }

        fn failing(addr: &'static str) -> Arc<Self> {
            Arc::new(Self {
                addr,
                hits: AtomicUsize::new(0),
                delay: None,
                fail: true,
            })
        }

        fn stalling(addr: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                addr,
                hits: AtomicUsize::new(0),
                delay: Some(delay),
                fail: false,
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for Mock {
        async fn exchange(&self, msg: &Message<Bytes>) -> Result<Message<Bytes>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                Err(UpstreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock refused",
                )))
            } else {
                Ok(msg.clone())
            }
        }

        fn address(&self) -> &str {
            self.addr
        }
    }

    #[test]
    fn unknown_rtt_sorts_first_and_stable() {
        tokio_test::block_on(async {
            let dispatcher = Upstreams::new(Duration::from_secs(1));
            dispatcher.rtt.record("known", Duration::from_millis(10));

            let a = Mock::answering("unknown-a");
            let b = Mock::answering("unknown-b");
            let known = Mock::answering("known");

            let primary: Vec<Arc<dyn Upstream>> = vec![known.clone(), a.clone(), b.clone()];
            dispatcher
                .exchange(&dummy_msg(), &primary, &[])
                .await
                .unwrap();

            // The first unknown upstream in configured order must have won.
            assert_eq!(a.hits(), 1);
            assert_eq!(b.hits(), 0);
            assert_eq!(known.hits(), 0);
        })
    }

    #[tokio::test]
    async fn success_records_rtt() {
        let dispatcher = Upstreams::new(Duration::from_secs(1));
        let slow = Mock::stalling("slow", Duration::from_millis(50));
        let primary: Vec<Arc<dyn Upstream>> = vec![slow];
        dispatcher
            .exchange(&dummy_msg(), &primary, &[])
            .await
            .unwrap();
        assert!(dispatcher.rtt("slow") >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn fallback_only_on_total_failure() {
        let dispatcher = Upstreams::new(Duration::from_secs(1));
        let good = Mock::answering("good");
        let fallback = Mock::answering("fallback");
        let primary: Vec<Arc<dyn Upstream>> = vec![good.clone()];
        let fallbacks: Vec<Arc<dyn Upstream>> = vec![fallback.clone()];

        dispatcher
            .exchange(&dummy_msg(), &primary, &fallbacks)
            .await
            .unwrap();
        assert_eq!(fallback.hits(), 0);

        let bad = Mock::failing("bad");
        let primary: Vec<Arc<dyn Upstream>> = vec![bad.clone()];
        dispatcher
            .exchange(&dummy_msg(), &primary, &fallbacks)
            .await
            .unwrap();
        assert_eq!(bad.hits(), 1);
        assert_eq!(fallback.hits(), 1);
    }

    #[tokio::test]
    async fn all_failed() {
        let dispatcher = Upstreams::new(Duration::from_millis(100));
        let bad = Mock::failing("bad");
        let stalled = Mock::stalling("stalled", Duration::from_secs(5));
        let primary: Vec<Arc<dyn Upstream>> = vec![bad, stalled];
        match dispatcher.exchange(&dummy_msg(), &primary, &[]).await {
            Err(UpstreamError::AllFailed) => {}
            _ => panic!("expected AllFailed"),
        }
    }

    #[tokio::test]
    async fn fallbacks_race() {
        let dispatcher = Upstreams::new(Duration::from_secs(1));
        let bad = Mock::failing("bad");
        let dead = Mock::failing("dead-fallback");
        let good = Mock::answering("good-fallback");
        let primary: Vec<Arc<dyn Upstream>> = vec![bad];
        let fallbacks: Vec<Arc<dyn Upstream>> = vec![dead.clone(), good.clone()];

        let started = std::time::Instant::now();
        dispatcher
            .exchange(&dummy_msg(), &primary, &fallbacks)
            .await
            .unwrap();
        assert_eq!(good.hits(), 1);
        // One failed primary plus a raced fallback stays well under three
        // per-attempt timeouts.
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
