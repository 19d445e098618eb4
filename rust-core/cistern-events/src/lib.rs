// SPDX-License-Identifier: PMPL-1.0-or-later
//! Cistern event collections.
//!
//! Maps telemetry events (flat JSON objects with `_ts` and `_tag`) onto
//! timestamp-prefixed keys in a [`cistern_storage::Collection`], so that a
//! time window is a single bounded range scan. Adds retention-driven
//! compaction and a registry of named collections.

pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod registry;

pub use collection::EventCollection;
pub use config::{CisternConfig, CollectionConfig};
pub use error::{EventError, EventResult};
pub use event::{Event, HASH_FIELD, ID_FIELD, TAG_FIELD, TIMESTAMP_FIELD};
pub use key::EventKey;
pub use registry::CollectionRegistry;
