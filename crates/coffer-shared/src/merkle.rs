//! Reconciliation trie.
//!
//! A base-3 trie keyed by the digits of [`Timestamp::trie_key`] (whole
//! minutes since the epoch). Every node carries the XOR of the hashes of all
//! timestamps inserted beneath it, so the hash of a node depends only on the
//! *set* of timestamps under it and two replicas holding the same messages
//! compute identical tries no matter in which order the messages arrived.
//!
//! The trie is persisted per group and shipped to clients as JSON:
//!
//! ```json
//! {"1":{"0":{...},"hash":-10823},"2":{...},"hash":4711}
//! ```
//!
//! Children come first in ascending digit order, then `hash` as a signed
//! 32-bit integer. An empty trie is `{}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{TRIE_BUCKET_MS, TRIE_KEY_DIGITS, TRIE_PRUNE_KEEP};
use crate::error::TrieError;
use crate::timestamp::Timestamp;

const DIGIT_KEYS: [&str; 3] = ["0", "1", "2"];
const FIELDS: &[&str] = &["0", "1", "2", "hash"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trie {
    hash: u32,
    children: BTreeMap<u8, Trie>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_hash(&self) -> u32 {
        self.hash
    }

    pub fn is_empty(&self) -> bool {
        self.hash == 0 && self.children.is_empty()
    }

    pub fn child(&self, digit: u8) -> Option<&Trie> {
        self.children.get(&digit)
    }

    /// Fold a timestamp into every node on its root-to-leaf path.
    ///
    /// XOR is its own inverse: inserting the same timestamp twice removes it
    /// again. Callers must only insert timestamps that are new to the set.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let hash = timestamp.hash();
        self.hash ^= hash;

        let mut node = self;
        for digit in timestamp.trie_key() {
            node = node.children.entry(digit).or_default();
            node.hash ^= hash;
        }
    }

    /// Prune with the default retention of [`TRIE_PRUNE_KEEP`] children per level.
    pub fn prune(&self) -> Trie {
        self.prune_to(TRIE_PRUNE_KEEP)
    }

    /// Keep only the `keep` highest-keyed (most recent) children at every
    /// level. Dropped subtrees are still accounted for in their ancestors'
    /// hashes, so the root hash never changes.
    pub fn prune_to(&self, keep: usize) -> Trie {
        if self.hash == 0 {
            return self.clone();
        }

        let children = self
            .children
            .iter()
            .rev()
            .take(keep)
            .map(|(digit, child)| (*digit, child.prune_to(keep)))
            .collect();

        Trie {
            hash: self.hash,
            children,
        }
    }

    /// Find where two tries diverge.
    ///
    /// Returns `None` when the root hashes agree. Otherwise follows the first
    /// differing child (ascending digit order) at each level until the
    /// children agree or run out, and returns the millis at which that
    /// bucket starts. A replica re-sends everything from that point.
    ///
    /// The path is right-padded to [`TRIE_KEY_DIGITS`] before it is read
    /// back, which only lands on the bucket start for 16-digit keys
    /// (1997 to 2051).
    pub fn diff(&self, other: &Trie) -> Option<u64> {
        if self.hash == other.hash {
            return None;
        }

        let empty = Trie::default();
        let mut left = self;
        let mut right = other;
        let mut key = Vec::new();

        loop {
            let digits: BTreeSet<u8> = left
                .children
                .keys()
                .chain(right.children.keys())
                .copied()
                .collect();

            let diverging = digits.into_iter().find(|digit| {
                let l = left.child(*digit).map_or(0, |n| n.hash);
                let r = right.child(*digit).map_or(0, |n| n.hash);
                l != r
            });

            match diverging {
                Some(digit) => {
                    key.push(digit);
                    left = left.child(digit).unwrap_or(&empty);
                    right = right.child(digit).unwrap_or(&empty);
                }
                None => return Some(key_to_millis(&key)),
            }
        }
    }

    pub fn to_json(&self) -> Result<String, TrieError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TrieError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn key_to_millis(key: &[u8]) -> u64 {
    let width = key.len().max(TRIE_KEY_DIGITS);
    let minutes = (0..width).fold(0u64, |acc, i| {
        acc * 3 + key.get(i).copied().unwrap_or(0) as u64
    });
    minutes * TRIE_BUCKET_MS
}

impl Serialize for Trie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let with_hash = !self.is_empty();
        let len = self.children.len() + usize::from(with_hash);

        let mut map = serializer.serialize_map(Some(len))?;
        for (digit, child) in &self.children {
            map.serialize_entry(DIGIT_KEYS[*digit as usize], child)?;
        }
        if with_hash {
            map.serialize_entry("hash", &(self.hash as i32))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Trie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TrieVisitor)
    }
}

struct TrieVisitor;

impl<'de> Visitor<'de> for TrieVisitor {
    type Value = Trie;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a merkle trie node")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Trie, A::Error> {
        let mut trie = Trie::default();
        while let Some(key) = access.next_key::<String>()? {
            match key.as_str() {
                "hash" => {
                    // older documents may carry the unsigned form
                    let hash: i64 = access.next_value()?;
                    trie.hash = hash as u32;
                }
                "0" | "1" | "2" => {
                    let digit = key.as_bytes()[0] - b'0';
                    trie.children.insert(digit, access.next_value()?);
                }
                other => return Err(de::Error::unknown_field(other, FIELDS)),
            }
        }
        Ok(trie)
    }
}
