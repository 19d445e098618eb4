// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Snapshot cursors.
//
// A cursor fixes the collection version when it is created and from then
// on only yields records committed at or before that version and not
// deleted by then. Concurrent commits never change what it sees.

use std::sync::Arc;

use crate::collection::Collection;
use crate::error::{StorageError, StorageResult};
use crate::record::{FileHeader, Record, MAX_LEVELS};
use crate::skiplist::{find_predecessor, RecordRef, RecordSource};

enum Position {
    /// Fresh cursor: the next advance starts at the first record.
    Start,
    /// After a seek: the next advance yields this record.
    Pending(Arc<Record>),
    Current(Arc<Record>),
    Exhausted,
}

/// An ordered, snapshot-isolated iterator over a collection.
///
/// ```no_run
/// # use cistern_storage::{Collection, CollectionOptions};
/// # let collection = Collection::open("/tmp/c.lm2", CollectionOptions::default()).unwrap();
/// let mut cursor = collection.cursor().unwrap();
/// cursor.seek(b"m").unwrap();
/// while cursor.advance().unwrap() {
///     println!("{:?} = {:?}", cursor.key(), cursor.value());
/// }
/// ```
pub struct Cursor<'c> {
    collection: &'c Collection,
    snapshot: u64,
    heads: [u64; MAX_LEVELS],
    position: Position,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(collection: &'c Collection, header: FileHeader) -> Self {
        Self {
            collection,
            snapshot: header.last_commit,
            heads: header.next,
            position: Position::Start,
        }
    }

    /// The collection version this cursor reads.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// True while the cursor is positioned on a record.
    pub fn valid(&self) -> bool {
        matches!(self.position, Position::Current(_))
    }

    /// Key of the current record, empty when not positioned.
    pub fn key(&self) -> &[u8] {
        match &self.position {
            Position::Current(record) => &record.key,
            _ => &[],
        }
    }

    /// Value of the current record, empty when not positioned.
    pub fn value(&self) -> &[u8] {
        match &self.position {
            Position::Current(record) => &record.value,
            _ => &[],
        }
    }

    /// Move to the next visible record. Returns false at the end.
    pub fn advance(&mut self) -> StorageResult<bool> {
        self.collection.ensure_open()?;
        let from = match std::mem::replace(&mut self.position, Position::Exhausted) {
            Position::Start => self.heads[0],
            Position::Pending(record) => {
                self.position = Position::Current(record);
                return Ok(true);
            }
            Position::Current(record) => record.next[0],
            Position::Exhausted => return Ok(false),
        };
        match self.first_visible(from)? {
            Some(record) => {
                self.position = Position::Current(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Position so that the next [`Cursor::advance`] yields the first
    /// visible record with key `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> StorageResult<()> {
        self.collection.ensure_open()?;
        let view = SnapshotView {
            collection: self.collection,
            heads: &self.heads,
        };

        let mut above = None;
        for level in (0..MAX_LEVELS).rev() {
            above = find_predecessor(&view, key, above, level, false)?;
        }
        let from = match above {
            Some(pred) => self.collection.read_record(pred)?.next[0],
            None => self.heads[0],
        };

        self.position = match self.first_visible(from)? {
            Some(record) => Position::Pending(record),
            None => Position::Exhausted,
        };
        Ok(())
    }

    /// Value of the visible record for exactly `key`.
    pub fn get(&mut self, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.seek(key)?;
        match &self.position {
            Position::Pending(record) if record.key == key => Ok(record.value.clone()),
            _ => Err(StorageError::KeyNotFound),
        }
    }

    fn first_visible(&self, mut offset: u64) -> StorageResult<Option<Arc<Record>>> {
        while offset != 0 {
            let record = self.collection.read_record(offset)?;
            if record.is_visible(self.snapshot) {
                return Ok(Some(record));
            }
            offset = record.next[0];
        }
        Ok(None)
    }
}

impl Iterator for Cursor<'_> {
    type Item = StorageResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => Some(Ok((self.key().to_vec(), self.value().to_vec()))),
            Ok(false) => None,
            Err(err) => {
                self.position = Position::Exhausted;
                Some(Err(err))
            }
        }
    }
}

/// The skip list as seen from a snapshot's level heads.
struct SnapshotView<'a> {
    collection: &'a Collection,
    heads: &'a [u64; MAX_LEVELS],
}

impl RecordSource for SnapshotView<'_> {
    fn record(&self, offset: u64) -> StorageResult<RecordRef<'_>> {
        self.collection.read_record(offset).map(RecordRef::Shared)
    }

    fn head(&self, level: usize) -> u64 {
        self.heads[level]
    }

    fn shortcut(&self, level: usize) -> Option<Arc<Record>> {
        self.collection.shortcut(level)
    }
}
