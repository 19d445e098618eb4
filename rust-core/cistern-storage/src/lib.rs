// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cistern Storage
//
// An embedded, ordered key-value store kept in a single append-only file.
// Records are linked into a persistent skip list; every batch of writes is
// committed atomically through a write-ahead log, and readers get
// snapshot-isolated cursors that never block the writer.
//
// # Modules
//
// - [`collection`] -- Opening, updating, closing and compacting a collection.
// - [`cursor`] -- Snapshot cursors (ordered iteration, seek, point lookup).
// - [`batch`] -- `WriteBatch`, the unit of atomic update.
// - [`cache`] -- The `RecordCache` trait and the default random-admission cache.
// - [`record`] -- On-disk layout of headers, records and sentinels.
// - [`stats`] -- Per-handle operation counters.
// - [`error`] -- The `StorageError` enum.
//
// # Example
//
// ```rust
// use cistern_storage::{Collection, CollectionOptions, WriteBatch};
//
// let dir = tempfile::tempdir().unwrap();
// let collection = Collection::create(dir.path().join("c.lm2"), CollectionOptions::default()).unwrap();
//
// let mut batch = WriteBatch::new();
// batch.set("key1", "1").set("key2", "2");
// collection.update(batch).unwrap();
//
// let mut cursor = collection.cursor().unwrap();
// assert_eq!(cursor.get(b"key2").unwrap(), b"2");
// ```

pub mod batch;
pub mod cache;
pub mod collection;
pub mod cursor;
pub mod error;
mod io;
pub mod record;
mod skiplist;
pub mod stats;

pub use batch::WriteBatch;
pub use cache::{RandomAdmissionCache, RecordCache};
pub use collection::{Collection, CollectionOptions};
pub use cursor::Cursor;
pub use error::{StorageError, StorageResult};
pub use stats::CollectionStats;
