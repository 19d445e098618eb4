// SPDX-License-Identifier: PMPL-1.0-or-later
//! Store configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty object is
//! a valid configuration.
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/cistern",
//!   "retention_days": 30,
//!   "collections": [{ "name": "flows", "retention_days": 7 }]
//! }
//! ```

use std::path::{Path, PathBuf};

use cistern_storage::CollectionOptions;
use serde::{Deserialize, Serialize};

use crate::error::{EventError, EventResult};
use crate::event::is_valid_tag;

/// Per-collection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection name; also the file stem under `data_dir`.
    pub name: String,
    /// Overrides the global retention for this collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CisternConfig {
    /// Directory holding `<name>.lm2` collection files.
    pub data_dir: PathBuf,
    /// Days of events kept by retention compaction. 0 keeps everything.
    pub retention_days: u32,
    /// Record cache bound per collection.
    pub cache_size: usize,
    /// Seconds between retention compactions when running periodically.
    pub compaction_interval_secs: u64,
    /// Collections to open at startup.
    pub collections: Vec<CollectionConfig>,
}

impl Default for CisternConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/"),
            retention_days: 0,
            cache_size: CollectionOptions::default().cache_size,
            compaction_interval_secs: 3600,
            collections: Vec::new(),
        }
    }
}

impl CisternConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> EventResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| EventError::Config(format!("cannot read {}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| EventError::Config(format!("cannot parse {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EventResult<()> {
        if self.compaction_interval_secs == 0 {
            return Err(EventError::Config(
                "compaction_interval_secs must be positive".to_string(),
            ));
        }
        for (i, collection) in self.collections.iter().enumerate() {
            if !is_valid_tag(&collection.name) || collection.name.contains('/') {
                return Err(EventError::Config(format!(
                    "invalid collection name {:?}",
                    collection.name
                )));
            }
            if self.collections[..i].iter().any(|c| c.name == collection.name) {
                return Err(EventError::Config(format!(
                    "collection {:?} configured twice",
                    collection.name
                )));
            }
        }
        Ok(())
    }

    /// Effective retention for `name`.
    pub fn retention_for(&self, name: &str) -> u32 {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.retention_days)
            .unwrap_or(self.retention_days)
    }

    pub fn collection_options(&self) -> CollectionOptions {
        CollectionOptions {
            cache_size: self.cache_size,
        }
    }
}
