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
//! A flat map from domain suffixes to arbitrary values, probed by suffix
//! enumeration. The longest matching suffix wins, and the empty suffix (the
//! root) matches every name.
//!
//! Keys are normalized to lower-case trailing-dot form, so `GOOGLE.com` and
//! `google.com.` are the same key. The map is deliberately not a trie: routing
//! tables are small and a handful of hash probes per query beats pointer
//! chasing.
//!
//! # Getting Started
//!
//! ```
//! use dsuffix::SuffixMap;
//! let mut map = SuffixMap::new();
//! map.insert("apple.com", 1);
//! assert_eq!(map.lookup("store.Apple.COM."), Some(("apple.com.", &1)));
//! assert_eq!(map.lookup("apple.cn"), None);
//! ```

use hashbrown::HashMap;

/// Normalize a domain name or suffix into the key form used by [`SuffixMap`]:
/// lower-case with a trailing dot. The root is represented by the empty
/// string.
pub fn normalize(name: &str) -> String {
    let mut name = name.to_lowercase();
    if name == "." {
        return String::new();
    }
    if !name.is_empty() && !name.ends_with('.') {
        name.push('.');
    }
    name
}

#[derive(Debug, Clone)]
/// A map from normalized domain suffixes to values, with longest-suffix
/// lookup.
pub struct SuffixMap<T> {
    map: HashMap<Box<str>, T>,
}

impl<T> Default for SuffixMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SuffixMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Number of suffixes stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map holds no suffixes at all.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert a value under the given suffix, returning the previous value if
    /// the suffix was already present. The suffix is normalized first; `""`
    /// (or `"."`) keys the root, which matches every name.
    pub fn insert(&mut self, suffix: &str, value: T) -> Option<T> {
        self.map.insert(normalize(suffix).into_boxed_str(), value)
    }

    /// Get a mutable reference to the value stored under the exact suffix, if
    /// any.
    pub fn get_mut(&mut self, suffix: &str) -> Option<&mut T> {
        self.map.get_mut(normalize(suffix).as_str())
    }

    /// Look up a name. Suffixes of the normalized name are probed from the
    /// longest to the shortest, with the empty suffix probed last; the first
    /// hit is returned together with the matched key. `google.` matches a
    /// `google.` entry but never a `google.com.` one.
    pub fn lookup(&self, name: &str) -> Option<(&str, &T)> {
        let name = normalize(name);
        let mut rest: &str = &name;
        loop {
            if let Some((k, v)) = self.map.get_key_value(rest) {
                return Some((k.as_ref(), v));
            }
            match rest.split_once('.') {
                Some((_, tail)) => rest = tail,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SuffixMap;

    #[test]
    fn longest_suffix_wins() {
        let mut map = SuffixMap::new();
        map.insert("b", 1);
        map.insert("a.b", 2);
        assert_eq!(map.lookup("x.a.b"), Some(("a.b.", &2)));
        assert_eq!(map.lookup("x.b"), Some(("b.", &1)));
    }

    #[test]
    fn single_label_edges() {
        let mut map = SuffixMap::new();
        map.insert("google", 1);
        map.insert("google.com", 2);
        assert_eq!(map.lookup("google."), Some(("google.", &1)));
        assert_eq!(map.lookup("www.google.com."), Some(("google.com.", &2)));
        assert_eq!(map.lookup("com."), None);
    }

    #[test]
    fn root_matches_everything_last() {
        let mut map = SuffixMap::new();
        map.insert("", 1);
        map.insert("apple.com", 2);
        assert_eq!(map.lookup("apple.com"), Some(("apple.com.", &2)));
        assert_eq!(map.lookup("anything.example"), Some(("", &1)));
        assert_eq!(map.lookup("google."), Some(("", &1)));
    }

    #[test]
    fn case_and_dot_normalization() {
        let mut map = SuffixMap::new();
        map.insert("Apple.COM.", 1);
        assert_eq!(map.lookup("store.apple.com"), Some(("apple.com.", &1)));
        assert_eq!(map.lookup("STORE.APPLE.COM."), Some(("apple.com.", &1)));
    }

    #[test]
    fn append_through_get_mut() {
        let mut map: SuffixMap<Vec<u32>> = SuffixMap::new();
        map.insert("apple.com", vec![1]);
        map.get_mut("apple.com.").unwrap().push(2);
        assert_eq!(map.lookup("www.apple.com"), Some(("apple.com.", &vec![1, 2])));
    }

    #[test]
    fn miss_without_root() {
        let mut map = SuffixMap::new();
        map.insert("apple.com", 1);
        assert_eq!(map.lookup("apple.cn"), None);
        assert_eq!(map.lookup("com"), None);
    }
}
