// SPDX-License-Identifier: PMPL-1.0-or-later
//! Error types for event collections.

use std::path::PathBuf;

use cistern_storage::StorageError;
use thiserror::Error;

/// Errors raised by event collections, the registry and configuration.
#[derive(Debug, Error)]
pub enum EventError {
    /// An event failed validation; nothing was written.
    #[error("invalid event: {0}")]
    Validation(String),

    /// A stored key is not a well-formed event key.
    #[error("invalid event key: {0}")]
    InvalidKey(String),

    /// The named collection has no file on disk.
    #[error("collection does not exist: {}", .0.display())]
    DoesNotExist(PathBuf),

    /// Failure in the underlying collection.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Event (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O outside a collection file (data directory, config file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding a collection handle was poisoned.
    #[error("lock poisoned")]
    LockPoisoned,
}

impl EventError {
    /// True for a missing collection or key.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DoesNotExist(_) => true,
            Self::Storage(err) => err.is_not_found() || matches!(err, StorageError::DoesNotExist(_)),
            _ => false,
        }
    }
}

/// Convenience type alias for event results.
pub type EventResult<T> = Result<T, EventError>;
