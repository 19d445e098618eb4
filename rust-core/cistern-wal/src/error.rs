// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Cistern Write-Ahead Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error conditions for WAL operations: I/O failures and the ways a torn
// or corrupted entry can present itself on read.

use thiserror::Error;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An I/O error occurred while reading or writing the WAL file.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A header or footer magic number did not match.
    /// This usually means the entry was never completely written.
    #[error("Bad {section} magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// Which part of the entry carried the bad magic ("header" or "footer").
        section: &'static str,
        /// The magic number that should have been present.
        expected: u32,
        /// The value actually read.
        found: u32,
    },

    /// CRC32 checksum mismatch over the record section.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// The CRC32 value stored in the footer.
        expected: u32,
        /// The CRC32 value computed from the record section.
        actual: u32,
    },

    /// The entry is shorter than its header declares.
    #[error("Truncated entry: needed {needed} bytes, only {available} available")]
    Truncated {
        /// Bytes required to finish decoding.
        needed: u64,
        /// Bytes actually present.
        available: u64,
    },

    /// A length or offset field holds a value that cannot be valid.
    #[error("Malformed entry: {0}")]
    Malformed(String),
}

impl WalError {
    /// True if the error describes an entry that was never completely
    /// written. Such an entry was never committed and can be discarded.
    /// I/O failures are not torn writes: the entry may still be intact.
    pub fn is_torn(&self) -> bool {
        matches!(
            self,
            WalError::BadMagic { .. }
                | WalError::CrcMismatch { .. }
                | WalError::Truncated { .. }
                | WalError::Malformed(_)
        )
    }
}

/// Convenience type alias for WAL results.
pub type WalResult<T> = Result<T, WalError>;
