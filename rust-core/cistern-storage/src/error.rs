// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for Cistern collections.
//
// Distinguishes failures that leave the collection untouched (rollbacks,
// missing keys, size limits) from failures that leave the handle unusable
// (internal errors after the WAL is durable).

use std::path::PathBuf;

use cistern_wal::WalError;
use thiserror::Error;

/// Errors returned by collection and cursor operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening a collection file that is not there.
    #[error("collection does not exist: {}", .0.display())]
    DoesNotExist(PathBuf),

    /// A point lookup found no visible record for the key.
    #[error("key not found")]
    KeyNotFound,

    /// A batch was rejected and the collection left exactly as it was.
    #[error("rollback: {reason}")]
    Rollback {
        /// True when the batch tried to overwrite a live key while
        /// overwrites were disallowed.
        duplicate_key: bool,
        /// The offending key, when one is known.
        conflicted_key: Option<Vec<u8>>,
        /// Human-readable cause.
        reason: String,
    },

    /// A failure after the commit point was durably logged. The handle is
    /// now inconsistent; reopening the file repairs it from the WAL.
    #[error("internal error: {0}")]
    Internal(String),

    /// The handle was closed (or replaced by compaction).
    #[error("collection is closed")]
    Closed,

    /// The file contents do not match the expected layout.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The key exceeds the on-disk key length field.
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge {
        /// Actual key size in bytes.
        size: usize,
        /// Maximum allowed key size in bytes.
        max: usize,
    },

    /// The value exceeds the on-disk value length field.
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge {
        /// Actual value size in bytes.
        size: usize,
        /// Maximum allowed value size in bytes.
        max: usize,
    },

    /// An I/O error occurred in the data file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// A lock protecting collection state was poisoned by a panicking thread.
    #[error("lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// True if this error is a rollback (the collection is unchanged).
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }

    /// True if this is a duplicate-key rollback.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            Self::Rollback {
                duplicate_key: true,
                ..
            }
        )
    }

    /// True if this error reports a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound)
    }

    /// Build a rollback error from any displayable cause.
    pub(crate) fn rollback(reason: impl std::fmt::Display) -> Self {
        Self::Rollback {
            duplicate_key: false,
            conflicted_key: None,
            reason: reason.to_string(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
