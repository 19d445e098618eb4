// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Cistern Write-Ahead Log - File handle
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `WalFile` owns the single WAL file belonging to a collection. Every
// append overwrites the file from offset 0 and is fsynced before
// returning; a failed append truncates the file so a partial entry never
// survives in a state that could be mistaken for a committed one.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::entry::WalEntry;
use crate::error::WalResult;

/// Handle to a collection's write-ahead log file.
#[derive(Debug)]
pub struct WalFile {
    path: PathBuf,
    file: File,
}

impl WalFile {
    /// Create (or truncate) the WAL file at `path`.
    pub fn create(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "Created WAL file");
        Ok(Self { path, file })
    }

    /// Open the WAL file at `path`, creating it empty if it does not exist.
    ///
    /// Existing contents are preserved so they can be replayed.
    pub fn open(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entry` at offset 0 and fsync.
    ///
    /// On failure the file is truncated (best effort) and the original
    /// error is returned.
    pub fn append(&mut self, entry: &WalEntry) -> WalResult<()> {
        let bytes = entry.serialize();
        if let Err(err) = self.write_and_sync(&bytes) {
            if let Err(truncate_err) = self.truncate() {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to truncate WAL after failed append"
                );
            }
            return Err(err);
        }
        debug!(records = entry.len(), bytes = bytes.len(), "Appended WAL entry");
        Ok(())
    }

    fn write_and_sync(&mut self, bytes: &[u8]) -> WalResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(bytes)?;
        self.file.set_len(bytes.len() as u64)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read the entry currently held in the file.
    ///
    /// Returns `Ok(None)` for an empty file and an error if the contents do
    /// not decode as a complete entry (a torn write).
    pub fn read_last_entry(&mut self) -> WalResult<Option<WalEntry>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        WalEntry::deserialize(&bytes).map(Some)
    }

    /// Discard the file's contents and fsync.
    pub fn truncate(&mut self) -> WalResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Close the handle and remove the file from disk.
    pub fn remove(self) -> WalResult<()> {
        let Self { path, file } = self;
        drop(file);
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "Removed WAL file");
        Ok(())
    }
}
