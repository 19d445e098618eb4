// SPDX-License-Identifier: PMPL-1.0-or-later
//! Registry of named event collections under one data directory.
//!
//! The registry is an owned object: collectors and the query layer receive
//! a reference to it (or to the `Arc<EventCollection>` it hands out) instead
//! of reaching for shared global state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::collection::EventCollection;
use crate::config::CisternConfig;
use crate::error::{EventError, EventResult};
use crate::event::is_valid_tag;

/// File extension of collection files.
pub const COLLECTION_EXTENSION: &str = "lm2";

/// Owns the open event collections of one data directory.
#[derive(Debug)]
pub struct CollectionRegistry {
    config: CisternConfig,
    collections: Mutex<HashMap<String, Arc<EventCollection>>>,
}

impl CollectionRegistry {
    /// Create a registry, creating the data directory if needed.
    pub fn new(config: CisternConfig) -> EventResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            collections: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CisternConfig {
        &self.config
    }

    /// Path of the file backing collection `name`.
    pub fn collection_path(&self, name: &str) -> EventResult<PathBuf> {
        if !is_valid_tag(name) || name.contains('/') {
            return Err(EventError::Validation(format!("invalid collection name {name:?}")));
        }
        Ok(self
            .config
            .data_dir
            .join(format!("{name}.{COLLECTION_EXTENSION}")))
    }

    /// Open collection `name`, failing with [`EventError::DoesNotExist`]
    /// if it has never been created.
    pub fn open(&self, name: &str) -> EventResult<Arc<EventCollection>> {
        self.get_or_load(name, false)
    }

    /// Open collection `name`, creating it if it does not exist.
    pub fn open_or_create(&self, name: &str) -> EventResult<Arc<EventCollection>> {
        self.get_or_load(name, true)
    }

    fn get_or_load(&self, name: &str, create: bool) -> EventResult<Arc<EventCollection>> {
        let mut collections = self.collections.lock().map_err(|_| EventError::LockPoisoned)?;
        if let Some(collection) = collections.get(name) {
            if !collection.is_ok() {
                warn!(collection = name, "Reopening unusable collection handle");
                collection.reopen()?;
            }
            return Ok(Arc::clone(collection));
        }

        let path = self.collection_path(name)?;
        let options = self.config.collection_options();
        let collection = match EventCollection::open(&path, options) {
            Ok(collection) => collection,
            Err(EventError::DoesNotExist(_)) if create => {
                info!(collection = name, path = %path.display(), "Creating event collection");
                EventCollection::create(&path, options)?
            }
            Err(err) => return Err(err),
        };
        collection.set_retention(self.config.retention_for(name));

        let collection = Arc::new(collection);
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// An already-open collection.
    pub fn get(&self, name: &str) -> Option<Arc<EventCollection>> {
        self.collections.lock().ok()?.get(name).cloned()
    }

    /// Names of the open collections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .lock()
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Open (creating as needed) every collection named in the config.
    pub fn open_configured(&self) -> EventResult<Vec<Arc<EventCollection>>> {
        self.config
            .collections
            .iter()
            .map(|c| self.open_or_create(&c.name))
            .collect()
    }

    /// Retention-compact every open collection. Failures are logged and the
    /// first one is returned after all collections have been tried.
    pub fn compact_all(&self) -> EventResult<()> {
        let collections: Vec<(String, Arc<EventCollection>)> = self
            .collections
            .lock()
            .map_err(|_| EventError::LockPoisoned)?
            .iter()
            .map(|(name, c)| (name.clone(), Arc::clone(c)))
            .collect();

        let mut first_error = None;
        for (name, collection) in collections {
            if let Err(err) = collection.compact() {
                warn!(collection = %name, error = %err, "Compaction failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
