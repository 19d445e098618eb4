// SPDX-License-Identifier: PMPL-1.0-or-later
//! Event collections: JSON events stored in a time-ordered collection.
//!
//! The collection handle sits behind a read/write lock. Writes and queries
//! share it; retention compaction takes it exclusively because it replaces
//! the handle with a freshly opened one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use chrono::{Duration, Utc};
use cistern_storage::{Collection, CollectionOptions, CollectionStats, StorageError, WriteBatch};
use tracing::{debug, info, warn};

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::key::{is_event_key, to_micros, EventKey};

/// A collection of events with a retention policy.
pub struct EventCollection {
    path: PathBuf,
    options: CollectionOptions,
    retention_days: AtomicU32,
    handle: RwLock<Collection>,
}

impl std::fmt::Debug for EventCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCollection")
            .field("path", &self.path)
            .field("retention_days", &self.retention_days())
            .finish_non_exhaustive()
    }
}

impl EventCollection {
    /// Create a new, empty event collection at `path`.
    pub fn create(path: impl AsRef<Path>, options: CollectionOptions) -> EventResult<Self> {
        let path = path.as_ref().to_path_buf();
        let collection = Collection::create(&path, options)?;
        Ok(Self::wrap(path, options, collection))
    }

    /// Open an existing event collection.
    pub fn open(path: impl AsRef<Path>, options: CollectionOptions) -> EventResult<Self> {
        let path = path.as_ref().to_path_buf();
        let collection = Collection::open(&path, options).map_err(|err| match err {
            StorageError::DoesNotExist(path) => EventError::DoesNotExist(path),
            other => EventError::Storage(other),
        })?;
        Ok(Self::wrap(path, options, collection))
    }

    fn wrap(path: PathBuf, options: CollectionOptions, collection: Collection) -> Self {
        Self {
            path,
            options,
            retention_days: AtomicU32::new(0),
            handle: RwLock::new(collection),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Days of events kept by [`EventCollection::compact`]; 0 keeps everything.
    pub fn set_retention(&self, days: u32) {
        self.retention_days.store(days, Ordering::Relaxed);
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days.load(Ordering::Relaxed)
    }

    /// Validate and store `events` as one atomic batch.
    ///
    /// Any invalid event rejects the whole call before anything is written.
    /// Returns the new collection version.
    pub fn store_events<I>(&self, events: I) -> EventResult<u64>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut batch = WriteBatch::new();
        let mut count = 0usize;
        for event in events {
            let key = event.key()?;
            batch.set(key.encode(), event.to_stored_json()?);
            count += 1;
        }

        let handle = self.handle.read().map_err(|_| EventError::LockPoisoned)?;
        let version = handle.update(batch)?;
        debug!(path = %self.path.display(), events = count, version, "Stored events");
        Ok(version)
    }

    /// Run `f` against the current collection handle while holding the
    /// handle lock shared. Compaction cannot swap the handle meanwhile.
    pub fn with_collection<R>(&self, f: impl FnOnce(&Collection) -> R) -> EventResult<R> {
        let handle = self.handle.read().map_err(|_| EventError::LockPoisoned)?;
        Ok(f(&handle))
    }

    pub fn version(&self) -> EventResult<u64> {
        self.with_collection(|collection| collection.version())?
            .map_err(EventError::from)
    }

    pub fn stats(&self) -> EventResult<CollectionStats> {
        self.with_collection(Collection::stats)
    }

    /// Drop events older than the retention horizon and reopen the
    /// compacted file. Non-event keys are always kept.
    pub fn compact(&self) -> EventResult<()> {
        let mut handle = self.handle.write().map_err(|_| EventError::LockPoisoned)?;

        let retention_days = self.retention_days();
        let min_ts = if retention_days == 0 {
            None
        } else {
            Some(to_micros(&(Utc::now() - Duration::days(i64::from(retention_days)))))
        };

        let mut dropped = 0u64;
        handle.compact_with(|key, value| {
            if let (Some(min_ts), true) = (min_ts, is_event_key(key)) {
                match EventKey::decode(key) {
                    Ok(decoded) if decoded.timestamp < min_ts => {
                        dropped += 1;
                        return None;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Keeping record with undecodable event key"),
                }
            }
            Some((key.to_vec(), value.to_vec()))
        })?;

        *handle = Collection::open(&self.path, self.options)?;
        info!(
            path = %self.path.display(),
            retention_days,
            dropped,
            "Compacted event collection"
        );
        Ok(())
    }

    /// False once the underlying handle can no longer serve reads and
    /// writes: after a failure past the commit point, or a compaction whose
    /// reopen failed. [`EventCollection::reopen`] recovers it.
    pub fn is_ok(&self) -> bool {
        self.handle
            .read()
            .map(|handle| handle.is_ok())
            .unwrap_or(false)
    }

    /// Close the current handle and open the file again, replaying any
    /// commit the old handle left half-applied.
    pub fn reopen(&self) -> EventResult<()> {
        let mut handle = self.handle.write().map_err(|_| EventError::LockPoisoned)?;
        // The old handle must let go of the WAL before the new one reads it.
        handle.close_in_place()?;
        *handle = Collection::open(&self.path, self.options)?;
        info!(path = %self.path.display(), "Reopened event collection");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn close_handle(&self) {
        self.handle.write().unwrap().close_in_place().unwrap();
    }

    /// Close the collection and delete its files.
    pub fn destroy(self) -> EventResult<()> {
        let handle = self
            .handle
            .into_inner()
            .map_err(|_| EventError::LockPoisoned)?;
        handle.destroy()?;
        Ok(())
    }
}
