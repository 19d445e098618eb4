// SPDX-License-Identifier: PMPL-1.0-or-later
//! Event key encoding.
//!
//! ```text
//! 'e' | 8-byte big-endian microsecond timestamp | '|' | tag | '|' | hash
//! ```
//!
//! The timestamp sits right after the prefix byte, so byte order of keys is
//! chronological order of events regardless of tag. Timestamps are never
//! before the epoch, which keeps the big-endian encoding order-preserving.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{EventError, EventResult};

/// First byte of every event key. Other prefixes are free for internal use.
pub const EVENT_KEY_PREFIX: u8 = b'e';

/// Separator between timestamp, tag and hash.
pub const KEY_SEPARATOR: u8 = b'|';

const TIMESTAMP_LEN: usize = 8;

/// A decoded event key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub tag: String,
    /// Empty when the event had no `_hash`.
    pub hash: String,
}

impl EventKey {
    pub fn new(timestamp: i64, tag: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            timestamp,
            tag: tag.into(),
            hash: hash.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + TIMESTAMP_LEN + 2 + self.tag.len() + self.hash.len());
        key.push(EVENT_KEY_PREFIX);
        key.extend_from_slice(&self.timestamp.to_be_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(self.tag.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(self.hash.as_bytes());
        key
    }

    pub fn decode(key: &[u8]) -> EventResult<Self> {
        let header = 1 + TIMESTAMP_LEN + 1;
        if key.len() < header + 1 {
            return Err(EventError::InvalidKey(format!("key is only {} bytes", key.len())));
        }
        if key[0] != EVENT_KEY_PREFIX {
            return Err(EventError::InvalidKey(format!("unexpected prefix {:#04x}", key[0])));
        }
        if key[1 + TIMESTAMP_LEN] != KEY_SEPARATOR {
            return Err(EventError::InvalidKey("missing separator after timestamp".to_string()));
        }

        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&key[1..1 + TIMESTAMP_LEN]);
        let timestamp = i64::from_be_bytes(ts);

        let rest = std::str::from_utf8(&key[header..])
            .map_err(|err| EventError::InvalidKey(format!("tag is not UTF-8: {err}")))?;
        let Some((tag, hash)) = rest.split_once(KEY_SEPARATOR as char) else {
            return Err(EventError::InvalidKey("missing separator after tag".to_string()));
        };

        Ok(Self::new(timestamp, tag, hash))
    }

    /// The `_id` reported for this event: `ts|tag`, plus `|hash` when set.
    pub fn id(&self) -> String {
        if self.hash.is_empty() {
            format!("{}|{}", self.timestamp, self.tag)
        } else {
            format!("{}|{}|{}", self.timestamp, self.tag, self.hash)
        }
    }
}

/// True if `key` is in the event key space.
pub fn is_event_key(key: &[u8]) -> bool {
    key.first() == Some(&EVENT_KEY_PREFIX)
}

/// Smallest key of any event at `micros`.
pub fn range_start(micros: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + TIMESTAMP_LEN);
    key.push(EVENT_KEY_PREFIX);
    key.extend_from_slice(&micros.to_be_bytes());
    key
}

/// A key greater than or equal to every event key at `micros`.
pub fn range_end(micros: i64) -> Vec<u8> {
    let mut key = range_start(micros);
    key.push(0xFF);
    key
}

/// Microseconds since the epoch.
pub fn to_micros(time: &DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

/// Inverse of [`to_micros`], saturating at chrono's representable range.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or(if micros < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// RFC 3339 with the shortest exact fractional seconds and a `Z` suffix.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let key = EventKey::new(1, "sflow", "abc").encode();
        assert_eq!(key[0], b'e');
        assert_eq!(&key[1..9], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&key[9..], b"|sflow|abc");
    }

    #[test]
    fn test_decode_roundtrip_with_and_without_hash() {
        for key in [
            EventKey::new(1_577_836_800_000_000, "snmp", ""),
            EventKey::new(42, "a/b.c-d_e", "h|with|pipes"),
        ] {
            assert_eq!(EventKey::decode(&key.encode()).unwrap(), key);
        }
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(EventKey::decode(b"").is_err());
        assert!(EventKey::decode(b"x12345678|t|").is_err());
        assert!(EventKey::decode(b"e12345678Xt|").is_err());
        assert!(EventKey::decode(b"e12345678|tag-without-separator").is_err());
    }

    #[test]
    fn test_id_format() {
        assert_eq!(EventKey::new(10, "t", "").id(), "10|t");
        assert_eq!(EventKey::new(10, "t", "h").id(), "10|t|h");
    }

    #[test]
    fn test_range_bounds_enclose_keys() {
        let key = EventKey::new(500, "zzzz", "zzzz").encode();
        assert!(range_start(500) <= key);
        assert!(key <= range_end(500));
        assert!(range_end(499) < range_start(500));
    }

    #[test]
    fn test_micros_roundtrip_and_format() {
        let time = DateTime::parse_from_rfc3339("2020-01-01T00:10:00.25Z")
            .unwrap()
            .with_timezone(&Utc);
        let micros = to_micros(&time);
        assert_eq!(from_micros(micros), time);
        assert_eq!(format_timestamp(&from_micros(micros)), "2020-01-01T00:10:00.250Z");
        assert_eq!(format_timestamp(&from_micros(0)), "1970-01-01T00:00:00Z");
    }

    proptest! {
        /// Key order matches timestamp order whatever the tags are.
        #[test]
        fn prop_key_order_is_time_order(
            a in 0i64..i64::MAX / 2,
            b in 0i64..i64::MAX / 2,
            tag_a in "[a-z]{1,8}",
            tag_b in "[a-z]{1,8}",
        ) {
            prop_assume!(a != b);
            let ka = EventKey::new(a, tag_a, "").encode();
            let kb = EventKey::new(b, tag_b, "").encode();
            prop_assert_eq!(a < b, ka < kb);
        }
    }
}
