//! Message identity.
//!
//! A [`Timestamp`] is the `(millis, counter, node)` triple produced by a
//! replica's hybrid logical clock. Its canonical text form is
//!
//! ```text
//! 2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF
//! ```
//!
//! i.e. an ISO-8601 UTC instant with millisecond precision, a 4-digit
//! upper-case hex counter and a 16-character node id. The encoding is fixed
//! width, so lexical order of the text equals the `Ord` of the struct, which
//! is what lets the store sort and filter on the raw column.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{MAX_COUNTER, MAX_MILLIS, NODE_ID_LENGTH, TRIE_BUCKET_MS, TRIE_KEY_DIGITS};
use crate::error::TimestampError;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const ISO_LENGTH: usize = 24;
const COUNTER_DIGITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    millis: u64,
    counter: u16,
    // always NODE_ID_LENGTH chars, left-padded with '0'
    node: String,
}

impl Timestamp {
    pub fn new(millis: u64, counter: u16, node: &str) -> Self {
        Self {
            millis,
            counter,
            node: pad_node(node),
        }
    }

    pub fn zero() -> Self {
        Self::new(0, 0, "0")
    }

    pub fn max() -> Self {
        Self::new(MAX_MILLIS - 1, MAX_COUNTER, "FFFFFFFFFFFFFFFF")
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Parse the canonical encoding.
    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        let malformed = || TimestampError::Malformed(input.to_string());

        let parts: Vec<&str> = input.split('-').collect();
        if parts.len() != 5 {
            return Err(malformed());
        }

        let date = parts[..3].join("-");
        if date.len() != ISO_LENGTH {
            return Err(malformed());
        }
        let millis = NaiveDateTime::parse_from_str(&date, ISO_FORMAT)
            .map_err(|_| malformed())?
            .and_utc()
            .timestamp_millis();
        if millis < 0 || millis as u64 >= MAX_MILLIS {
            return Err(malformed());
        }

        // Only the canonical form is accepted, so the stored text is exactly
        // what the sender hashed.
        let counter = parts[3];
        if counter.len() != COUNTER_DIGITS
            || !counter
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        {
            return Err(malformed());
        }
        let counter = u16::from_str_radix(counter, 16).map_err(|_| malformed())?;

        let node = parts[4];
        if node.len() != NODE_ID_LENGTH || !node.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(malformed());
        }

        Ok(Self::new(millis as u64, counter, node))
    }

    /// 32-bit MurmurHash3 (seed 0) of the canonical encoding.
    pub fn hash(&self) -> u32 {
        let encoded = self.to_string();
        // reading from an in-memory cursor cannot fail
        murmur3::murmur3_32(&mut Cursor::new(encoded.as_bytes()), 0).unwrap_or(0)
    }

    /// Base-3 digits of the whole minutes in `millis`, most significant
    /// first, without padding: minute 0 is the single digit `0`, anything
    /// before 1997-04 has fewer than [`TRIE_KEY_DIGITS`] digits and anything
    /// past 2051 has more.
    pub fn trie_key(&self) -> Vec<u8> {
        let mut minutes = self.millis / TRIE_BUCKET_MS;
        let mut digits = Vec::with_capacity(TRIE_KEY_DIGITS + 1);
        loop {
            digits.push((minutes % 3) as u8);
            minutes /= 3;
            if minutes == 0 {
                break;
            }
        }
        digits.reverse();
        digits
    }
}

fn pad_node(node: &str) -> String {
    let padded = format!("{node:0>width$}", width = NODE_ID_LENGTH);
    let skip = padded.chars().count().saturating_sub(NODE_ID_LENGTH);
    padded.chars().skip(skip).collect()
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instant = Utc
            .timestamp_millis_opt(self.millis as i64)
            .single()
            .ok_or(fmt::Error)?;
        write!(
            f,
            "{}-{:04X}-{}",
            instant.format(ISO_FORMAT),
            self.counter,
            self.node
        )
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_sentinels() {
        assert_eq!(Timestamp::zero(), Timestamp::zero());
        assert!(Timestamp::max() > Timestamp::zero());
        assert!(Timestamp::new(10, 0, "1") > Timestamp::zero());
        assert!(Timestamp::new(10, 0, "1") < Timestamp::max());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let invalid = [
            "",
            " ",
            "0",
            "invalid",
            "1969-1-1T0:0:0.0Z-0-0-0",
            "1969-01-01T00:00:00.000Z-0000-0000000000000000",
            "10000-01-01T00:00:00.000Z-FFFF-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-10000-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-FFFF-10000000000000000",
            "2015-04-24T22:23:42.123Z-XYZ1-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z-0000-",
        ];
        for input in invalid {
            assert!(
                matches!(Timestamp::parse(input), Err(TimestampError::Malformed(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_parses_and_formats_canonical_input() {
        let valid = [
            "1970-01-01T00:00:00.000Z-0000-0000000000000000",
            "2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF",
            "9999-12-31T23:59:59.999Z-FFFF-FFFFFFFFFFFFFFFF",
        ];
        for input in valid {
            let parsed = Timestamp::parse(input).unwrap();
            assert!(parsed.millis() < MAX_MILLIS);
            assert_eq!(parsed.to_string(), input);
        }
    }

    #[test]
    fn test_rejects_non_canonical_forms() {
        let non_canonical = [
            // short node
            "1970-01-01T00:00:00.010Z-0001-1",
            "2015-04-24T22:23:42.123Z-1000-123456789ABCDEF",
            // short or lower-case counter
            "2015-04-24T22:23:42.123Z-1-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z-00ff-0123456789ABCDEF",
            // non-alphanumeric node
            "2015-04-24T22:23:42.123Z-1000-0123456789ABCDE_",
        ];
        for input in non_canonical {
            assert!(
                matches!(Timestamp::parse(input), Err(TimestampError::Malformed(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_parsed_text_is_echoed_unchanged() {
        let input = "2023-02-11T09:15:42.007Z-00A3-9f3c4e2b1a0d8c7e";
        let ts = Timestamp::parse(input).unwrap();
        assert_eq!(ts.counter(), 0xA3);
        assert_eq!(ts.node(), "9f3c4e2b1a0d8c7e");
        assert_eq!(ts.to_string(), input);
    }

    #[test]
    fn test_new_pads_short_node() {
        let ts = Timestamp::new(10, 1, "1");
        assert_eq!(ts.node(), "0000000000000001");
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.010Z-0001-0000000000000001");
    }

    #[test]
    fn test_text_order_matches_struct_order() {
        let a = Timestamp::parse("2018-11-13T13:20:00.000Z-0000-0000000000000002").unwrap();
        let b = Timestamp::parse("2018-11-13T13:20:00.000Z-0001-0000000000000001").unwrap();
        let c = Timestamp::parse("2018-11-13T13:20:00.001Z-0000-0000000000000000").unwrap();
        assert!(a < b && b < c);
        assert!(a.to_string() < b.to_string() && b.to_string() < c.to_string());
    }

    #[test]
    fn test_trie_key_is_unpadded_base3_minutes() {
        // 5 minutes = 12 in base 3
        let ts = Timestamp::new(5 * 60_000 + 59_999, 0, "1");
        assert_eq!(ts.trie_key(), vec![1, 2]);
        assert_eq!(Timestamp::zero().trie_key(), vec![0]);

        // 2018-11-13T13:20Z = minute 25_701_920 = 1210100210101222 in base 3
        let recent = Timestamp::parse("2018-11-13T13:20:00.000Z-0000-0000000000000001").unwrap();
        assert_eq!(
            recent.trie_key(),
            vec![1, 2, 1, 0, 1, 0, 0, 2, 1, 0, 1, 0, 1, 2, 2, 2]
        );
    }

    #[test]
    fn test_trie_key_grows_past_sixteen_digits() {
        let far = Timestamp::parse("2100-01-01T00:00:00.000Z-0000-0000000000000001").unwrap();
        assert_eq!(far.trie_key().len(), TRIE_KEY_DIGITS + 1);
    }

    #[test]
    fn test_hash_depends_on_every_component() {
        let base = Timestamp::new(1_000, 0, "1");
        assert_eq!(base.hash(), Timestamp::new(1_000, 0, "1").hash());
        assert_ne!(base.hash(), Timestamp::new(1_001, 0, "1").hash());
        assert_ne!(base.hash(), Timestamp::new(1_000, 1, "1").hash());
        assert_ne!(base.hash(), Timestamp::new(1_000, 0, "2").hash());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ts = Timestamp::new(62, 3, "abc");
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:00.062Z-0003-0000000000000abc\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
