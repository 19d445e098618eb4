// SPDX-License-Identifier: PMPL-1.0-or-later
//! The `Event` type: a flat JSON object with a few reserved fields.

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EventError, EventResult};
use crate::key::{format_timestamp, to_micros, EventKey};

/// Event time, RFC 3339. Required on write.
pub const TIMESTAMP_FIELD: &str = "_ts";
/// Source or stream identifier. Required on write.
pub const TAG_FIELD: &str = "_tag";
/// Optional deduplication token; part of the key.
pub const HASH_FIELD: &str = "_hash";
/// Derived from the key on read; never stored.
pub const ID_FIELD: &str = "_id";

/// Longest accepted `_tag`.
pub const MAX_TAG_LEN: usize = 256;

/// A telemetry event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.get(TAG_FIELD).and_then(Value::as_str)
    }

    pub fn hash(&self) -> Option<&str> {
        self.0.get(HASH_FIELD).and_then(Value::as_str)
    }

    /// Parse `_ts`.
    pub fn timestamp(&self) -> EventResult<DateTime<Utc>> {
        let raw = self
            .0
            .get(TIMESTAMP_FIELD)
            .ok_or_else(|| EventError::Validation(format!("missing {TIMESTAMP_FIELD}")))?;
        let text = raw
            .as_str()
            .ok_or_else(|| EventError::Validation(format!("{TIMESTAMP_FIELD} must be a string")))?;
        DateTime::parse_from_rfc3339(text)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|err| {
                EventError::Validation(format!("{TIMESTAMP_FIELD} {text:?} is not RFC 3339: {err}"))
            })
    }

    /// Check the reserved fields and derive the storage key.
    pub fn key(&self) -> EventResult<EventKey> {
        let tag = self
            .tag()
            .ok_or_else(|| EventError::Validation(format!("missing {TAG_FIELD}")))?;
        if !is_valid_tag(tag) {
            return Err(EventError::Validation(format!("invalid {TAG_FIELD} {tag:?}")));
        }

        let timestamp = self.timestamp()?;
        let micros = to_micros(&timestamp);
        if micros < 0 {
            return Err(EventError::Validation(format!(
                "{TIMESTAMP_FIELD} {} is before the Unix epoch",
                format_timestamp(&timestamp)
            )));
        }

        Ok(EventKey::new(micros, tag, self.hash().unwrap_or_default()))
    }

    /// JSON stored for this event: everything except `_id`.
    pub fn to_stored_json(&self) -> EventResult<Vec<u8>> {
        if self.0.contains_key(ID_FIELD) {
            let mut stored = self.0.clone();
            stored.remove(ID_FIELD);
            return Ok(serde_json::to_vec(&stored)?);
        }
        Ok(serde_json::to_vec(&self.0)?)
    }
}

impl Deref for Event {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Event {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Event {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Event {
    type Error = EventError;

    fn try_from(value: Value) -> EventResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EventError::Validation(format!(
                "event must be a JSON object, got {other}"
            ))),
        }
    }
}

/// Tags are 1 to [`MAX_TAG_LEN`] characters from `[A-Za-z0-9_./-]`.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[a-zA-Z0-9_./-]{{1,{MAX_TAG_LEN}}}$"))
        .unwrap_or_else(|err| panic!("static tag pattern failed to compile: {err}"))
});

/// True if `tag` may be used as an event tag or collection name.
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_PATTERN.is_match(tag)
}
