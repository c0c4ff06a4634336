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

//! Per-domain routing: a flat map from reserved suffixes to upstream sets,
//! probed by longest-suffix matching. Read-only once the proxy starts.

use crate::upstreams::Upstream;
use dsuffix::SuffixMap;
use log::debug;
use std::sync::Arc;

/// A reserved routing-table entry for a domain suffix.
pub enum RouteEntry {
    /// The ordered upstreams reserved for names under the suffix.
    Reserved(Vec<Arc<dyn Upstream>>),
    /// Names under the suffix receive an empty positive response and are
    /// never forwarded. Written `#` in configurations.
    Unresolvable,
}

/// Maps query names to the upstream set responsible for them.
pub struct RouteTable {
    default: Vec<Arc<dyn Upstream>>,
    reserved: SuffixMap<RouteEntry>,
}

impl RouteTable {
    /// Create a table with the given default upstream list.
    pub fn new(default: Vec<Arc<dyn Upstream>>) -> Self {
        Self {
            default,
            reserved: SuffixMap::new(),
        }
    }

    /// Reserve upstreams for names under `suffix`, appending when the suffix
    /// is already reserved. The empty suffix overrides the default list for
    /// every name without a longer reservation. An unresolvable marker on the
    /// suffix is left untouched.
    pub fn add_reserved(&mut self, suffix: &str, upstreams: Vec<Arc<dyn Upstream>>) -> &mut Self {
        match self.reserved.get_mut(suffix) {
            Some(RouteEntry::Reserved(existing)) => existing.extend(upstreams),
            Some(RouteEntry::Unresolvable) => {}
            None => {
                self.reserved.insert(suffix, RouteEntry::Reserved(upstreams));
            }
        }
        self
    }

    /// Mark every name under `suffix` as unresolvable, replacing any
    /// reservation.
    pub fn set_unresolvable(&mut self, suffix: &str) -> &mut Self {
        self.reserved.insert(suffix, RouteEntry::Unresolvable);
        self
    }

    /// The upstream set for a query name, and whether the name is resolvable
    /// at all. The longest reserved suffix wins; names matching an
    /// unresolvable marker return an empty set and `false`; names without any
    /// reservation use the default list.
    pub fn upstreams_for(&self, qname: &str) -> (Vec<Arc<dyn Upstream>>, bool) {
        match self.reserved.lookup(qname) {
            Some((suffix, RouteEntry::Reserved(upstreams))) => {
                debug!("{} routed via upstreams reserved for '{}'", qname, suffix);
                (upstreams.clone(), true)
            }
            Some((suffix, RouteEntry::Unresolvable)) => {
                debug!("{} matches the unresolvable marker on '{}'", qname, suffix);
                (Vec::new(), false)
            }
            None => (self.default.clone(), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RouteTable;
    use crate::upstreams::{Result, Upstream};
    use async_trait::async_trait;
    use bytes::Bytes;
    use domain::base::Message;
    use std::sync::Arc;

    struct Stub(&'static str);

    #[async_trait]
    impl Upstream for Stub {
        async fn exchange(&self, _: &Message<Bytes>) -> Result<Message<Bytes>> {
            unreachable!()
        }

        fn address(&self) -> &str {
            self.0
        }
    }

    fn stub(addr: &'static str) -> Arc<dyn Upstream> {
        Arc::new(Stub(addr))
    }

    fn addrs(table: &RouteTable, qname: &str) -> (Vec<String>, bool) {
        let (upstreams, resolvable) = table.upstreams_for(qname);
        (
            upstreams.iter().map(|u| u.address().to_owned()).collect(),
            resolvable,
        )
    }

    // The reservation set mirrors a typical configuration:
    //   google.com, local  -> 4.3.2.1:53
    //   www.google.com, "" -> 1.2.3.4:53
    //   maps.google.com    -> unresolvable
    //   www.google.com     -> tls://1.1.1.1:853 (appended)
    fn table() -> RouteTable {
        let mut table = RouteTable::new(vec![stub("9.9.9.9:53")]);
        table
            .add_reserved("google.com", vec![stub("4.3.2.1:53")])
            .add_reserved("local", vec![stub("4.3.2.1:53")])
            .add_reserved("www.google.com", vec![stub("1.2.3.4:53")])
            .add_reserved("", vec![stub("1.2.3.4:53")])
            .set_unresolvable("maps.google.com")
            .add_reserved("www.google.com", vec![stub("tls://1.1.1.1:853")]);
        table
    }

    #[test]
    fn longest_suffix_wins() {
        let table = table();
        assert_eq!(
            addrs(&table, "www.google.com."),
            (vec!["1.2.3.4:53".to_owned(), "tls://1.1.1.1:853".to_owned()], true)
        );
        assert_eq!(
            addrs(&table, "www2.google.com."),
            (vec!["4.3.2.1:53".to_owned()], true)
        );
        assert_eq!(
            addrs(&table, "internal.local."),
            (vec!["4.3.2.1:53".to_owned()], true)
        );
    }

    #[test]
    fn root_overrides_default() {
        let table = table();
        assert_eq!(addrs(&table, "google."), (vec!["1.2.3.4:53".to_owned()], true));
        assert_eq!(
            addrs(&table, "example.com."),
            (vec!["1.2.3.4:53".to_owned()], true)
        );
    }

    #[test]
    fn unresolvable_marker() {
        let table = table();
        assert_eq!(addrs(&table, "maps.google.com."), (vec![], false));
        // The marker survives later reservation attempts.
        let mut table = table;
        table.add_reserved("maps.google.com", vec![stub("5.5.5.5:53")]);
        assert_eq!(addrs(&table, "maps.google.com."), (vec![], false));
    }

    #[test]
    fn default_without_root_override() {
        let mut table = RouteTable::new(vec![stub("9.9.9.9:53")]);
        table.add_reserved("google.com", vec![stub("4.3.2.1:53")]);
        assert_eq!(
            addrs(&table, "example.com."),
            (vec!["9.9.9.9:53".to_owned()], true)
        );
    }

    #[test]
    fn routing_is_deterministic() {
        let table = table();
        for _ in 0..3 {
            assert_eq!(
                addrs(&table, "WWW.google.COM"),
                (vec!["1.2.3.4:53".to_owned(), "tls://1.1.1.1:853".to_owned()], true)
            );
        }
    }
}
