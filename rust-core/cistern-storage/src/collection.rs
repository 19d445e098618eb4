// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A collection: one append-only file holding an ordered key-value map as a
// persistent skip list, plus its write-ahead log.
//
// Commit protocol for `update`:
//
//   1. Splice the batch into a private copy of the affected links.
//   2. Append the new records and a sentinel past `last_commit`; fsync.
//   3. Log the rewritten headers (records and file header) to the WAL; fsync.
//      This is the commit point.
//   4. Patch the headers in place; fsync; publish the new header.
//   5. Truncate the WAL.
//
// A failure before step 3 completes truncates the file back to
// `last_commit` and reports a rollback. A failure in step 4 leaves the
// handle inconsistent; reopening replays the WAL.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use cistern_wal::{WalEntry, WalFile};
use tracing::{debug, error, info, warn};

use crate::batch::WriteBatch;
use crate::cache::{RandomAdmissionCache, RecordCache, DEFAULT_CACHE_SIZE};
use crate::cursor::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::io::{read_exact_at, write_all_at};
use crate::record::{
    encode_sentinel, verify_sentinel, FileHeader, Record, RecordHeader, DATA_START,
    FILE_HEADER_SIZE, MAX_KEY_LEN, MAX_LEVELS, MAX_VALUE_LEN, RECORD_HEADER_SIZE, SENTINEL_SIZE,
};
use crate::skiplist::{find_predecessor, random_height, RecordRef, RecordSource};
use crate::stats::{CollectionStats, StatsRecorder};

/// Suffix of a collection's write-ahead log.
pub const WAL_SUFFIX: &str = ".wal";

/// Suffix of the temporary file written during compaction.
pub const COMPACT_SUFFIX: &str = ".compact";

/// Records copied per batch during compaction.
pub const COMPACTION_BATCH_SIZE: usize = 1000;

const STATE_OPEN: u8 = 0;
const STATE_INCONSISTENT: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Options for creating or opening a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Maximum number of records held by the record cache.
    pub cache_size: usize,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Points at which tests can make the commit path fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    AfterAppend,
    BeforeSync,
    BeforeWal,
    ApplyPatches,
}

/// An open collection file.
///
/// A collection is safe to share between threads: one writer at a time
/// runs [`Collection::update`] while any number of cursors read.
pub struct Collection {
    path: PathBuf,
    file: File,
    /// Published header. Cursors copy it to fix their snapshot.
    header: RwLock<FileHeader>,
    /// The write lock. `None` once the handle is closed.
    writer: Mutex<Option<WalFile>>,
    /// Held shared by disk reads and exclusively while patching headers,
    /// so no reader observes a half-written header.
    file_lock: RwLock<()>,
    cache: Box<dyn RecordCache>,
    stats: StatsRecorder,
    state: AtomicU8,
    #[cfg(test)]
    fail_point: Mutex<Option<FailPoint>>,
    /// Leave the file as the failure found it, as a process crash would.
    #[cfg(test)]
    crash_on_failure: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("state", &self.state.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Collection {
    /// Create a new, empty collection at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>, options: CollectionOptions) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let header = FileHeader::new();
        file.set_len(DATA_START)?;
        write_all_at(&file, &header.encode(), 0)?;
        file.sync_all()?;

        let wal = WalFile::create(sibling(&path, WAL_SUFFIX))?;
        info!(path = %path.display(), "Created collection");
        Ok(Self::from_parts(path, file, header, wal, options))
    }

    /// Open an existing collection, recovering from any interrupted commit
    /// or compaction.
    pub fn open(path: impl AsRef<Path>, options: CollectionOptions) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        recover_compaction(&path)?;

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::DoesNotExist(path))
            }
            Err(err) => return Err(err.into()),
        };

        let mut wal = WalFile::open(sibling(&path, WAL_SUFFIX))?;
        match wal.read_last_entry() {
            Ok(Some(entry)) => {
                for patch in entry.records() {
                    write_all_at(&file, &patch.data, patch.offset)?;
                }
                file.sync_all()?;
                info!(path = %path.display(), patches = entry.len(), "Replayed WAL entry");
            }
            Ok(None) => {}
            Err(err) if err.is_torn() => {
                warn!(path = %path.display(), error = %err, "Discarding incomplete WAL entry");
            }
            Err(err) => return Err(err.into()),
        }

        let header = read_file_header(&file)?;
        let len = file.metadata()?.len();
        if len < header.last_commit {
            return Err(StorageError::CorruptedData(format!(
                "file is {len} bytes but last commit is at {}",
                header.last_commit
            )));
        }
        if header.last_commit > DATA_START {
            let sentinel_at = header.last_commit - SENTINEL_SIZE;
            let mut sentinel = [0u8; SENTINEL_SIZE as usize];
            read_exact_at(&file, &mut sentinel, sentinel_at)?;
            verify_sentinel(sentinel_at, &sentinel)?;
        }
        if len > header.last_commit {
            file.set_len(header.last_commit)?;
            file.sync_all()?;
            debug!(
                path = %path.display(),
                discarded = len - header.last_commit,
                "Truncated uncommitted tail"
            );
        }
        wal.truncate()?;

        info!(path = %path.display(), version = header.last_commit, "Opened collection");
        Ok(Self::from_parts(path, file, header, wal, options))
    }

    fn from_parts(
        path: PathBuf,
        file: File,
        header: FileHeader,
        wal: WalFile,
        options: CollectionOptions,
    ) -> Self {
        Self {
            path,
            file,
            header: RwLock::new(header),
            writer: Mutex::new(Some(wal)),
            file_lock: RwLock::new(()),
            cache: Box::new(RandomAdmissionCache::new(options.cache_size)),
            stats: StatsRecorder::default(),
            state: AtomicU8::new(STATE_OPEN),
            #[cfg(test)]
            fail_point: Mutex::new(None),
            #[cfg(test)]
            crash_on_failure: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Path of the collection file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The collection's current version: the offset just past its latest
    /// commit. Strictly increases with every committed batch.
    pub fn version(&self) -> StorageResult<u64> {
        Ok(self
            .header
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .last_commit)
    }

    /// False once a post-commit failure has left this handle unusable.
    pub fn is_ok(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// Counters for this handle.
    pub fn stats(&self) -> CollectionStats {
        self.stats.snapshot()
    }

    pub(crate) fn ensure_open(&self) -> StorageResult<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => Ok(()),
            STATE_INCONSISTENT => Err(StorageError::Internal(
                "collection is inconsistent; reopen it to recover".to_string(),
            )),
            _ => Err(StorageError::Closed),
        }
    }

    fn mark_inconsistent(&self) {
        self.state.store(STATE_INCONSISTENT, Ordering::Release);
    }

    /// Start a cursor over the collection as of its current version.
    pub fn cursor(&self) -> StorageResult<Cursor<'_>> {
        self.ensure_open()?;
        let header = *self.header.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Cursor::new(self, header))
    }

    /// Fetch the record at `offset` from the cache or the file.
    pub(crate) fn read_record(&self, offset: u64) -> StorageResult<Arc<Record>> {
        if offset < DATA_START {
            return Err(StorageError::CorruptedData(format!(
                "record offset {offset} points into the file header"
            )));
        }
        if let Some(record) = self.cache.get(offset) {
            self.stats.hit();
            return Ok(record);
        }

        let generation = self.cache.generation();
        let record = {
            let _guard = self.file_lock.read().map_err(|_| StorageError::LockPoisoned)?;
            let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
            read_exact_at(&self.file, &mut header_bytes, offset)?;
            let header = RecordHeader::decode(offset, &header_bytes)?;

            let mut key = vec![0u8; header.key_len + header.value_len];
            read_exact_at(&self.file, &mut key, offset + RECORD_HEADER_SIZE as u64)?;
            let value = key.split_off(header.key_len);

            Arc::new(Record {
                offset,
                height: header.height,
                next: header.next,
                deleted: header.deleted,
                key,
                value,
            })
        };

        self.stats.miss();
        self.cache.push(Arc::clone(&record), generation);
        Ok(record)
    }

    /// The pinned max-key record, if it is linked at `level`.
    pub(crate) fn shortcut(&self, level: usize) -> Option<Arc<Record>> {
        self.cache
            .max_key_record()
            .filter(|record| record.height as usize >= level)
    }

    /// Apply `batch` atomically and return the new version.
    ///
    /// On error the collection is unchanged unless the error is
    /// [`StorageError::Internal`], which also marks the handle inconsistent.
    pub fn update(&self, batch: WriteBatch) -> StorageResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        self.ensure_open()?;
        let wal = writer.as_mut().ok_or(StorageError::Closed)?;

        let base = *self.header.read().map_err(|_| StorageError::LockPoisoned)?;
        if batch.is_empty() {
            return Ok(base.last_commit);
        }

        let allow_overwrite = batch.allows_overwrite();
        let (sets, deletes) = batch.into_parts();
        for (key, value) in &sets {
            check_sizes(key, value)?;
        }

        let append_len: u64 = sets
            .iter()
            .map(|(key, value)| (RECORD_HEADER_SIZE + key.len() + value.len()) as u64)
            .sum();
        let sentinel_at = base.last_commit + append_len;
        let commit = sentinel_at + SENTINEL_SIZE;

        let mut txn = Transaction::new(self, base, commit);
        let mut rng = rand::thread_rng();
        for (key, value) in sets {
            let height = random_height(&mut rng);
            txn.insert(key, value, height, allow_overwrite)
                .map_err(into_rollback)?;
        }
        let deleted = txn.delete_all(&deletes).map_err(into_rollback)?;
        let Staged {
            appended,
            inserted,
            patches,
            header,
        } = txn.finish();

        if let Err(err) = self.append_records(&appended, base.last_commit, sentinel_at) {
            return Err(self.roll_back(wal, base.last_commit, err));
        }
        let logged = self
            .inject(FailPoint::BeforeWal)
            .map_err(StorageError::from)
            .and_then(|()| wal.append(&patches).map_err(StorageError::from));
        if let Err(err) = logged {
            return Err(self.roll_back(wal, base.last_commit, err));
        }

        self.apply_patches(&patches)?;
        match self.header.write() {
            Ok(mut published) => *published = header,
            Err(_) => {
                self.mark_inconsistent();
                return Err(StorageError::LockPoisoned);
            }
        }
        if let Err(err) = wal.truncate() {
            warn!(path = %self.path.display(), error = %err, "Failed to truncate WAL after commit");
        }

        self.stats.written(inserted);
        debug!(version = commit, inserted, deleted, "Committed batch");
        Ok(commit)
    }

    /// Append the new records and the sentinel, then fsync.
    fn append_records(&self, appended: &[u8], at: u64, sentinel_at: u64) -> StorageResult<()> {
        write_all_at(&self.file, appended, at)?;
        self.inject(FailPoint::AfterAppend)?;
        write_all_at(&self.file, &encode_sentinel(sentinel_at), sentinel_at)?;
        self.inject(FailPoint::BeforeSync)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Undo a failed commit that never reached the WAL.
    fn roll_back(&self, wal: &mut WalFile, last_commit: u64, cause: StorageError) -> StorageError {
        #[cfg(test)]
        if self.crash_on_failure.load(Ordering::Acquire) {
            self.mark_inconsistent();
            return StorageError::Internal(format!("crashed: {cause}"));
        }

        let restored = self
            .file
            .set_len(last_commit)
            .and_then(|()| self.file.sync_all())
            .map_err(StorageError::from)
            .and_then(|()| wal.truncate().map_err(StorageError::from));

        match restored {
            Ok(()) => {
                warn!(path = %self.path.display(), error = %cause, "Rolled back batch");
                into_rollback(cause)
            }
            Err(err) => {
                self.mark_inconsistent();
                error!(
                    path = %self.path.display(),
                    error = %err,
                    cause = %cause,
                    "Rollback failed"
                );
                StorageError::Internal(format!("rollback failed: {err} (after: {cause})"))
            }
        }
    }

    /// Write logged patches into the file and evict the patched records.
    fn apply_patches(&self, patches: &WalEntry) -> StorageResult<()> {
        self.cache.begin_patch();
        let applied = self.write_patches(patches);
        let offsets: Vec<u64> = patches
            .records()
            .iter()
            .map(|patch| patch.offset)
            .filter(|&offset| offset >= DATA_START)
            .collect();
        self.cache.end_patch(&offsets);

        if let Err(err) = applied {
            self.mark_inconsistent();
            error!(path = %self.path.display(), error = %err, "Failed to apply committed patches");
            return Err(StorageError::Internal(format!(
                "failed to apply committed patches: {err}"
            )));
        }
        Ok(())
    }

    fn write_patches(&self, patches: &WalEntry) -> StorageResult<()> {
        let _guard = self.file_lock.write().map_err(|_| StorageError::LockPoisoned)?;
        self.inject(FailPoint::ApplyPatches)?;
        for patch in patches.records() {
            write_all_at(&self.file, &patch.data, patch.offset)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Rewrite the collection without tombstones or superseded records.
    pub fn compact(&self) -> StorageResult<()> {
        self.compact_with(|key, value| Some((key.to_vec(), value.to_vec())))
    }

    /// Rewrite the collection through `retain`, which sees every visible
    /// record in key order and returns the record to keep (possibly
    /// rewritten) or `None` to drop it.
    ///
    /// On success the file at [`Collection::path`] is replaced and this
    /// handle is closed; open the path again to keep using it.
    pub fn compact_with<F>(&self, mut retain: F) -> StorageResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> Option<(Vec<u8>, Vec<u8>)>,
    {
        let mut writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        self.ensure_open()?;

        let target_path = sibling(&self.path, COMPACT_SUFFIX);
        let target = Collection::create(&target_path, CollectionOptions { cache_size: 0 })?;
        let copied = match self.copy_into(&target, &mut retain) {
            Ok(copied) => copied,
            Err(err) => {
                if let Err(cleanup) = target.destroy() {
                    warn!(path = %target_path.display(), error = %cleanup, "Failed to remove compaction output");
                }
                return Err(err);
            }
        };
        target.close()?;
        fs::rename(&target_path, &self.path)?;

        self.state.store(STATE_CLOSED, Ordering::Release);
        if let Some(wal) = writer.take() {
            if let Err(err) = wal.remove() {
                warn!(path = %self.path.display(), error = %err, "Failed to remove WAL after compaction");
            }
        }
        info!(path = %self.path.display(), records = copied, "Compacted collection");
        Ok(())
    }

    fn copy_into<F>(&self, target: &Collection, retain: &mut F) -> StorageResult<u64>
    where
        F: FnMut(&[u8], &[u8]) -> Option<(Vec<u8>, Vec<u8>)>,
    {
        let mut cursor = self.cursor()?;
        let mut batch = WriteBatch::new();
        let mut copied = 0u64;
        while cursor.advance()? {
            if let Some((key, value)) = retain(cursor.key(), cursor.value()) {
                batch.set(key, value);
                copied += 1;
                if batch.len() >= COMPACTION_BATCH_SIZE {
                    target.update(std::mem::take(&mut batch))?;
                }
            }
        }
        if !batch.is_empty() {
            target.update(batch)?;
        }
        Ok(copied)
    }

    /// Close the handle. The WAL is removed unless the handle is
    /// inconsistent, in which case it is left for the next open to replay.
    pub fn close(mut self) -> StorageResult<()> {
        self.shutdown()
    }

    /// Close the handle without consuming it, so an owner can replace it.
    /// Later calls fail with [`StorageError::Closed`]. The WAL is handled
    /// as in [`Collection::close`].
    pub fn close_in_place(&mut self) -> StorageResult<()> {
        self.shutdown()
    }

    /// Close the handle and delete the collection file and its WAL.
    pub fn destroy(mut self) -> StorageResult<()> {
        self.shutdown()?;
        let wal_path = sibling(&self.path, WAL_SUFFIX);
        if wal_path.exists() {
            fs::remove_file(&wal_path)?;
        }
        fs::remove_file(&self.path)?;
        info!(path = %self.path.display(), "Destroyed collection");
        Ok(())
    }

    fn shutdown(&mut self) -> StorageResult<()> {
        let state = std::mem::replace(self.state.get_mut(), STATE_CLOSED);
        let wal = self
            .writer
            .get_mut()
            .map_err(|_| StorageError::LockPoisoned)?
            .take();
        if let Some(wal) = wal {
            if state == STATE_OPEN {
                wal.remove()?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn inject(&self, point: FailPoint) -> io::Result<()> {
        let mut armed = self
            .fail_point
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "fail point lock poisoned"))?;
        if *armed == Some(point) {
            *armed = None;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected failure at {point:?}"),
            ));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn inject(&self, _point: FailPoint) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn arm_fail_point(&self, point: FailPoint) {
        *self.fail_point.lock().unwrap() = Some(point);
    }

    /// Fail at `point` and stop there, skipping the rollback.
    #[cfg(test)]
    pub(crate) fn arm_crash(&self, point: FailPoint) {
        self.crash_on_failure.store(true, Ordering::Release);
        self.arm_fail_point(point);
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(path = %self.path.display(), error = %err, "Failed to close collection cleanly");
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// The writer's view while staging a batch: committed records overlaid
/// with private copies of everything the batch has relinked.
struct Transaction<'c> {
    collection: &'c Collection,
    header: FileHeader,
    base: u64,
    commit: u64,
    append_len: u64,
    dirty: HashMap<u64, Record>,
    appended: Vec<u64>,
    /// Per-level search start for the next (larger) key.
    hints: [Option<u64>; MAX_LEVELS],
}

/// Output of a staged transaction.
struct Staged {
    appended: Vec<u8>,
    inserted: u64,
    patches: WalEntry,
    header: FileHeader,
}

impl<'c> Transaction<'c> {
    fn new(collection: &'c Collection, header: FileHeader, commit: u64) -> Self {
        Self {
            collection,
            header,
            base: header.last_commit,
            commit,
            append_len: 0,
            dirty: HashMap::new(),
            appended: Vec::new(),
            hints: [None; MAX_LEVELS],
        }
    }

    fn record_mut(&mut self, offset: u64) -> StorageResult<&mut Record> {
        let collection = self.collection;
        match self.dirty.entry(offset) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = collection.read_record(offset)?;
                Ok(entry.insert(Record::clone(&record)))
            }
        }
    }

    /// Link a new record for `key`. Keys must arrive in ascending order.
    fn insert(
        &mut self,
        key: Vec<u8>,
        value: Vec<u8>,
        height: u8,
        allow_overwrite: bool,
    ) -> StorageResult<()> {
        let offset = self.base + self.append_len;
        let mut record = Record::new(offset, height, key, value);
        self.append_len += record.encoded_len();

        let mut above = None;
        for level in (0..MAX_LEVELS).rev() {
            let start = above.or(self.hints[level]);
            let pred = find_predecessor(&*self, &record.key, start, level, true)?;

            if level == 0 {
                if let Some(pred) = pred {
                    self.supersede(pred, &record.key, allow_overwrite)?;
                }
            }

            if level <= height as usize {
                match pred {
                    Some(pred) => {
                        let prev = self.record_mut(pred)?;
                        record.next[level] = prev.next[level];
                        prev.next[level] = offset;
                    }
                    None => {
                        record.next[level] = self.header.next[level];
                        self.header.next[level] = offset;
                    }
                }
                self.hints[level] = Some(offset);
            } else if pred.is_some() {
                self.hints[level] = pred;
            }
            above = pred;
        }

        self.dirty.insert(offset, record);
        self.appended.push(offset);
        Ok(())
    }

    /// Tombstone the live record at `pred` if it holds `key`.
    fn supersede(&mut self, pred: u64, key: &[u8], allow_overwrite: bool) -> StorageResult<()> {
        let live = {
            let existing = self.record(pred)?;
            existing.key == key && existing.deleted == 0
        };
        if !live {
            return Ok(());
        }
        if !allow_overwrite {
            return Err(StorageError::Rollback {
                duplicate_key: true,
                conflicted_key: Some(key.to_vec()),
                reason: "duplicate key".to_string(),
            });
        }
        let commit = self.commit;
        self.record_mut(pred)?.deleted = commit;
        Ok(())
    }

    /// Tombstone the live record of each key. Returns how many existed.
    fn delete_all(&mut self, keys: &BTreeSet<Vec<u8>>) -> StorageResult<u64> {
        let mut deleted = 0;
        for key in keys {
            let mut above = None;
            for level in (0..MAX_LEVELS).rev() {
                above = find_predecessor(&*self, key, above, level, true)?;
            }
            let Some(pred) = above else { continue };
            let live = {
                let existing = self.record(pred)?;
                existing.key == *key && existing.deleted == 0
            };
            if live {
                let commit = self.commit;
                self.record_mut(pred)?.deleted = commit;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn finish(self) -> Staged {
        let mut appended = Vec::with_capacity(self.append_len as usize);
        for offset in &self.appended {
            if let Some(record) = self.dirty.get(offset) {
                record.encode_into(&mut appended);
            }
        }

        let mut relinked: Vec<&Record> = self
            .dirty
            .values()
            .filter(|record| record.offset < self.base)
            .collect();
        relinked.sort_by_key(|record| record.offset);

        let mut patches = WalEntry::new();
        for record in relinked {
            patches.push(record.offset, record.encode_header().to_vec());
        }
        let mut header = self.header;
        header.last_commit = self.commit;
        patches.push(0, header.encode().to_vec());

        Staged {
            appended,
            inserted: self.appended.len() as u64,
            patches,
            header,
        }
    }
}

impl RecordSource for Transaction<'_> {
    fn record(&self, offset: u64) -> StorageResult<RecordRef<'_>> {
        match self.dirty.get(&offset) {
            Some(record) => Ok(RecordRef::Borrowed(record)),
            None => self.collection.read_record(offset).map(RecordRef::Shared),
        }
    }

    fn head(&self, level: usize) -> u64 {
        self.header.next[level]
    }

    fn shortcut(&self, level: usize) -> Option<Arc<Record>> {
        self.collection.shortcut(level)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `path` with `suffix` appended to its file name.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn read_file_header(file: &File) -> StorageResult<FileHeader> {
    let mut bytes = [0u8; FILE_HEADER_SIZE];
    read_exact_at(file, &mut bytes, 0)?;
    FileHeader::decode(&bytes)
}

fn check_sizes(key: &[u8], value: &[u8]) -> StorageResult<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(StorageError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}

fn into_rollback(err: StorageError) -> StorageError {
    if err.is_rollback() {
        err
    } else {
        StorageError::rollback(err)
    }
}

/// Finish or discard a compaction interrupted by a crash.
///
/// The compacted file only replaces the original by rename, so a leftover
/// `.compact` next to an existing file is an incomplete copy.
fn recover_compaction(path: &Path) -> StorageResult<()> {
    let compact_path = sibling(path, COMPACT_SUFFIX);
    if !compact_path.exists() {
        return Ok(());
    }
    let compact_wal = sibling(&compact_path, WAL_SUFFIX);

    if path.exists() {
        fs::remove_file(&compact_path)?;
        if compact_wal.exists() {
            fs::remove_file(&compact_wal)?;
        }
        warn!(path = %path.display(), "Removed incomplete compaction output");
    } else {
        fs::rename(&compact_path, path)?;
        if compact_wal.exists() {
            fs::rename(&compact_wal, sibling(path, WAL_SUFFIX))?;
        }
        info!(path = %path.display(), "Recovered compacted collection");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_collection() -> (TempDir, Collection) {
        let dir = TempDir::new().unwrap();
        let collection =
            Collection::create(dir.path().join("test.lm2"), CollectionOptions::default()).unwrap();
        (dir, collection)
    }

    fn batch(pairs: &[(&str, &str)]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in pairs {
            batch.set(*key, *value);
        }
        batch
    }

    fn contents(collection: &Collection) -> Vec<(String, String)> {
        collection
            .cursor()
            .unwrap()
            .map(|item| {
                let (key, value) = item.unwrap();
                (
                    String::from_utf8(key).unwrap(),
                    String::from_utf8(value).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_new_collection_is_empty() {
        let (_dir, collection) = test_collection();
        assert_eq!(collection.version().unwrap(), DATA_START);
        assert!(contents(&collection).is_empty());
        assert!(collection.is_ok());
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (_dir, collection) = test_collection();
        let version = collection.update(WriteBatch::new()).unwrap();
        assert_eq!(version, DATA_START);
    }

    #[test]
    fn test_version_accounts_for_records_and_sentinel() {
        let (_dir, collection) = test_collection();
        let version = collection.update(batch(&[("ab", "xyz")])).unwrap();
        let expected = DATA_START + (RECORD_HEADER_SIZE + 2 + 3) as u64 + SENTINEL_SIZE;
        assert_eq!(version, expected);
    }

    #[test]
    fn test_failure_after_append_rolls_back() {
        let (_dir, collection) = test_collection();
        collection.update(batch(&[("a", "1")])).unwrap();
        let before = collection.version().unwrap();

        collection.arm_fail_point(FailPoint::AfterAppend);
        let err = collection.update(batch(&[("b", "2"), ("c", "3")])).unwrap_err();
        assert!(err.is_rollback(), "Expected rollback, got {err:?}");

        assert!(collection.is_ok());
        assert_eq!(collection.version().unwrap(), before);
        assert_eq!(fs::metadata(collection.path()).unwrap().len(), before);
        assert_eq!(contents(&collection), vec![("a".into(), "1".into())]);

        // The handle keeps working after a rollback.
        collection.update(batch(&[("d", "4")])).unwrap();
        assert_eq!(contents(&collection).len(), 2);
    }

    #[test]
    fn test_failure_before_sync_and_before_wal_roll_back() {
        for point in [FailPoint::BeforeSync, FailPoint::BeforeWal] {
            let (_dir, collection) = test_collection();
            collection.update(batch(&[("a", "1")])).unwrap();

            let mut overwrite = WriteBatch::new();
            overwrite.set("a", "2").delete("a");
            collection.arm_fail_point(point);
            assert!(collection.update(overwrite).unwrap_err().is_rollback());
            assert_eq!(contents(&collection), vec![("a".into(), "1".into())]);
        }
    }

    #[test]
    fn test_crash_before_commit_point_reopens_to_previous_state() {
        for point in [FailPoint::AfterAppend, FailPoint::BeforeSync, FailPoint::BeforeWal] {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("test.lm2");
            let committed = {
                let collection = Collection::create(&path, CollectionOptions::default()).unwrap();
                let version = collection.update(batch(&[("a", "1"), ("c", "3")])).unwrap();

                collection.arm_crash(point);
                let mut next = batch(&[("b", "2"), ("d", "4")]);
                next.set("a", "overwritten").delete("c");
                let err = collection.update(next).unwrap_err();
                assert!(matches!(err, StorageError::Internal(_)), "{point:?}: got {err:?}");
                assert!(
                    fs::metadata(&path).unwrap().len() > version,
                    "{point:?}: the uncommitted tail is left behind"
                );
                version
            };

            let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
            assert_eq!(reopened.version().unwrap(), committed, "{point:?}");
            assert_eq!(fs::metadata(&path).unwrap().len(), committed, "{point:?}");
            assert_eq!(
                contents(&reopened),
                vec![("a".into(), "1".into()), ("c".into(), "3".into())],
                "{point:?}"
            );
        }
    }

    #[test]
    fn test_failure_while_patching_is_recovered_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        {
            let collection = Collection::create(&path, CollectionOptions::default()).unwrap();
            collection.update(batch(&[("a", "1"), ("c", "3")])).unwrap();

            collection.arm_fail_point(FailPoint::ApplyPatches);
            let err = collection.update(batch(&[("b", "2")])).unwrap_err();
            assert!(matches!(err, StorageError::Internal(_)), "got {err:?}");
            assert!(!collection.is_ok());
            assert!(collection.cursor().is_err());
            assert!(collection.update(batch(&[("d", "4")])).is_err());
        }
        assert!(sibling(&path, WAL_SUFFIX).exists(), "WAL must survive an inconsistent close");

        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert_eq!(
            contents(&reopened),
            vec![
                ("a".into(), "1".into()),
                ("b".into(), "2".into()),
                ("c".into(), "3".into()),
            ]
        );
    }

    #[test]
    fn test_uncommitted_tail_is_discarded_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        let committed = {
            let collection = Collection::create(&path, CollectionOptions::default()).unwrap();
            collection.update(batch(&[("a", "1")])).unwrap()
        };
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xAA; 100]);
        fs::write(&path, bytes).unwrap();

        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert_eq!(reopened.version().unwrap(), committed);
        assert_eq!(fs::metadata(&path).unwrap().len(), committed);
    }

    #[test]
    fn test_torn_wal_is_discarded_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        let committed = {
            let collection = Collection::create(&path, CollectionOptions::default()).unwrap();
            let version = collection.update(batch(&[("a", "1")])).unwrap();
            collection.arm_fail_point(FailPoint::ApplyPatches);
            collection.update(batch(&[("b", "2")])).unwrap_err();
            version
        };

        // Cut the logged entry short, as a crash during the WAL write would.
        let wal_path = sibling(&path, WAL_SUFFIX);
        let wal_len = fs::metadata(&wal_path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .unwrap()
            .set_len(wal_len / 2)
            .unwrap();

        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert_eq!(reopened.version().unwrap(), committed);
        assert_eq!(contents(&reopened), vec![("a".into(), "1".into())]);
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), 0);
    }

    #[test]
    fn test_unreadable_wal_fails_open_and_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        {
            let collection = Collection::create(&path, CollectionOptions::default()).unwrap();
            collection.update(batch(&[("a", "1")])).unwrap();
            collection.arm_fail_point(FailPoint::ApplyPatches);
            collection.update(batch(&[("b", "2")])).unwrap_err();
        }

        // A directory in place of the WAL fails with an I/O error rather
        // than a decode error.
        let wal_path = sibling(&path, WAL_SUFFIX);
        let saved = fs::read(&wal_path).unwrap();
        fs::remove_file(&wal_path).unwrap();
        fs::create_dir(&wal_path).unwrap();
        let len_before = fs::metadata(&path).unwrap().len();

        let err = Collection::open(&path, CollectionOptions::default()).unwrap_err();
        assert!(matches!(err, StorageError::Wal(_)), "got {err:?}");
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);

        // With the log restored, the interrupted commit is replayed.
        fs::remove_dir(&wal_path).unwrap();
        fs::write(&wal_path, saved).unwrap();
        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert_eq!(
            contents(&reopened),
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Collection::open(dir.path().join("nope.lm2"), CollectionOptions::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::DoesNotExist(_)));
    }

    #[test]
    fn test_close_removes_wal() {
        let (_dir, collection) = test_collection();
        let wal_path = sibling(collection.path(), WAL_SUFFIX);
        assert!(wal_path.exists());
        collection.close().unwrap();
        assert!(!wal_path.exists());
    }

    #[test]
    fn test_destroy_removes_files() {
        let (_dir, collection) = test_collection();
        let path = collection.path().to_path_buf();
        collection.destroy().unwrap();
        assert!(!path.exists());
        assert!(!sibling(&path, WAL_SUFFIX).exists());
    }

    #[test]
    fn test_compact_closes_handle() {
        let (_dir, collection) = test_collection();
        collection.update(batch(&[("a", "1")])).unwrap();
        collection.compact().unwrap();
        assert!(matches!(collection.cursor(), Err(StorageError::Closed)));
        assert!(matches!(
            collection.update(batch(&[("b", "2")])),
            Err(StorageError::Closed)
        ));
    }

    #[test]
    fn test_leftover_compaction_output_is_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        Collection::create(&path, CollectionOptions::default())
            .unwrap()
            .update(batch(&[("a", "1")]))
            .unwrap();
        let compact_path = sibling(&path, COMPACT_SUFFIX);
        Collection::create(&compact_path, CollectionOptions::default())
            .unwrap()
            .close()
            .unwrap();

        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert!(!compact_path.exists());
        assert_eq!(contents(&reopened).len(), 1);
    }

    #[test]
    fn test_finished_compaction_output_is_adopted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lm2");
        let compact_path = sibling(&path, COMPACT_SUFFIX);
        {
            let compacted =
                Collection::create(&compact_path, CollectionOptions::default()).unwrap();
            compacted.update(batch(&[("k", "v")])).unwrap();
            compacted.close().unwrap();
        }

        let reopened = Collection::open(&path, CollectionOptions::default()).unwrap();
        assert!(!compact_path.exists());
        assert_eq!(contents(&reopened), vec![("k".into(), "v".into())]);
    }

    #[test]
    fn test_stats_count_reads_and_writes() {
        let (_dir, collection) = test_collection();
        collection.update(batch(&[("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(contents(&collection).len(), 2);
        assert_eq!(contents(&collection).len(), 2);

        let stats = collection.stats();
        assert_eq!(stats.records_written, 2);
        assert!(stats.records_read >= 4);
        assert_eq!(stats.records_read, stats.cache_hits + stats.cache_misses);
        assert!(stats.cache_hits > 0, "Second scan should hit the cache");
    }
}
