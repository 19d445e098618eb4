// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// On-disk layout of a collection file.
//
// ```text
// offset 0     file header (version, level heads, last_commit), padded
//              to DATA_START bytes
// DATA_START   record | record | ... | sentinel | record | ... | sentinel
// ```
//
// Record header (all integers little-endian, offsets stored as i64):
//
// ```text
// [1 byte:  height]               -- highest level the record is linked at
// [1 byte:  reserved]
// [8 bytes x MAX_LEVELS: next]    -- 0 means "no next record"
// [8 bytes: deleted]              -- 0 = live, else tombstoning commit
// [2 bytes: key_len (u16)]
// [4 bytes: value_len (u32)]
// [key_len bytes: key]
// [value_len bytes: value]
// ```
//
// A sentinel `{magic u32, offset i64}` closes every commit; the commit
// point is the sentinel's offset plus its size.

use crate::error::{StorageError, StorageResult};

/// Number of skip-list levels.
pub const MAX_LEVELS: usize = 4;

/// Probability of promoting a new record one level higher.
pub const LEVEL_PROBABILITY: f64 = 0.1;

/// File format version tag.
pub const FILE_VERSION: [u8; 8] = *b"lm2_001\n";

/// version + level heads + last_commit.
pub const FILE_HEADER_SIZE: usize = 8 + MAX_LEVELS * 8 + 8;

/// First byte of the data region. The header is padded up to here so
/// that offset 0 can mean "none" everywhere else.
pub const DATA_START: u64 = 512;

/// height + reserved + next pointers + deleted + key_len + value_len.
pub const RECORD_HEADER_SIZE: usize = 2 + MAX_LEVELS * 8 + 8 + 2 + 4;

/// Magic number opening every commit sentinel.
pub const SENTINEL_MAGIC: u32 = 0xDEAD_10CC;

/// magic + offset.
pub const SENTINEL_SIZE: u64 = 4 + 8;

/// Largest key the u16 length field can describe.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Largest value the u32 length field can describe.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

// ---------------------------------------------------------------------------
// FileHeader
// ---------------------------------------------------------------------------

/// The header at offset 0 of every collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Head offset of each level, 0 when the level is empty.
    pub next: [u64; MAX_LEVELS],
    /// Offset just past the most recent sentinel: the collection version.
    pub last_commit: u64,
}

impl FileHeader {
    /// Header of a freshly created, empty collection.
    pub fn new() -> Self {
        Self {
            next: [0; MAX_LEVELS],
            last_commit: DATA_START,
        }
    }

    /// Encode into the on-disk layout.
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[..8].copy_from_slice(&FILE_VERSION);
        for (level, offset) in self.next.iter().enumerate() {
            let at = 8 + level * 8;
            buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        }
        let at = 8 + MAX_LEVELS * 8;
        buf[at..at + 8].copy_from_slice(&self.last_commit.to_le_bytes());
        buf
    }

    /// Decode from the on-disk layout, checking the version tag.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(StorageError::CorruptedData(format!(
                "file header is {} bytes, expected {FILE_HEADER_SIZE}",
                bytes.len()
            )));
        }
        if bytes[..8] != FILE_VERSION {
            return Err(StorageError::CorruptedData(format!(
                "unknown file version {:?}",
                String::from_utf8_lossy(&bytes[..8])
            )));
        }
        let mut next = [0u64; MAX_LEVELS];
        for (level, slot) in next.iter_mut().enumerate() {
            *slot = read_offset(bytes, 8 + level * 8)?;
        }
        let last_commit = read_offset(bytes, 8 + MAX_LEVELS * 8)?;
        if last_commit < DATA_START {
            return Err(StorageError::CorruptedData(format!(
                "last commit {last_commit} precedes the data region"
            )));
        }
        Ok(Self { next, last_commit })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A key-value record and its skip-list links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Where the record lives in the file.
    pub offset: u64,
    /// Highest level this record is linked into (0-based).
    pub height: u8,
    /// Next record at each level, 0 when none.
    pub next: [u64; MAX_LEVELS],
    /// 0 while live, otherwise the commit version that deleted it.
    pub deleted: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// A new, unlinked record.
    pub fn new(offset: u64, height: u8, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            offset,
            height,
            next: [0; MAX_LEVELS],
            deleted: 0,
            key,
            value,
        }
    }

    /// Whether the record is visible to a reader holding `snapshot`.
    ///
    /// Records written at or after the snapshot are invisible, as are
    /// records tombstoned by a commit at or before it.
    pub fn is_visible(&self, snapshot: u64) -> bool {
        self.offset < snapshot && (self.deleted == 0 || self.deleted > snapshot)
    }

    /// Total bytes the record occupies on disk.
    pub fn encoded_len(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.key.len() + self.value.len()) as u64
    }

    /// Encode only the fixed-size header. Headers are the only part of a
    /// record that is ever rewritten in place.
    pub fn encode_header(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0] = self.height;
        for (level, offset) in self.next.iter().enumerate() {
            let at = 2 + level * 8;
            buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        }
        let at = 2 + MAX_LEVELS * 8;
        buf[at..at + 8].copy_from_slice(&self.deleted.to_le_bytes());
        buf[at + 8..at + 10].copy_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf[at + 10..at + 14].copy_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf
    }

    /// Append the full on-disk form (header, key, value) to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.encode_header());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
    }
}

/// The fixed-size part of a record as read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub height: u8,
    pub next: [u64; MAX_LEVELS],
    pub deleted: u64,
    pub key_len: usize,
    pub value_len: usize,
}

impl RecordHeader {
    /// Decode a record header read at `offset`.
    pub fn decode(offset: u64, bytes: &[u8; RECORD_HEADER_SIZE]) -> StorageResult<Self> {
        let height = bytes[0];
        if height as usize >= MAX_LEVELS {
            return Err(StorageError::CorruptedData(format!(
                "record at {offset} has height {height}"
            )));
        }
        let mut next = [0u64; MAX_LEVELS];
        for (level, slot) in next.iter_mut().enumerate() {
            *slot = read_offset(bytes, 2 + level * 8)?;
        }
        let at = 2 + MAX_LEVELS * 8;
        let deleted = read_offset(bytes, at)?;
        let key_len = u16::from_le_bytes([bytes[at + 8], bytes[at + 9]]) as usize;
        let value_len = u32::from_le_bytes([
            bytes[at + 10],
            bytes[at + 11],
            bytes[at + 12],
            bytes[at + 13],
        ]) as usize;
        Ok(Self {
            height,
            next,
            deleted,
            key_len,
            value_len,
        })
    }
}

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

/// Encode the sentinel written at `offset`.
pub fn encode_sentinel(offset: u64) -> [u8; SENTINEL_SIZE as usize] {
    let mut buf = [0u8; SENTINEL_SIZE as usize];
    buf[..4].copy_from_slice(&SENTINEL_MAGIC.to_le_bytes());
    buf[4..].copy_from_slice(&offset.to_le_bytes());
    buf
}

/// Check that `bytes` hold a valid sentinel for `offset`.
pub fn verify_sentinel(offset: u64, bytes: &[u8; SENTINEL_SIZE as usize]) -> StorageResult<()> {
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let stored = read_offset(bytes, 4)?;
    if magic != SENTINEL_MAGIC || stored != offset {
        return Err(StorageError::CorruptedData(format!(
            "invalid sentinel at {offset}: magic {magic:#010x}, offset {stored}"
        )));
    }
    Ok(())
}

/// Read an on-disk i64 offset, rejecting negative values.
fn read_offset(bytes: &[u8], at: usize) -> StorageResult<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    let value = i64::from_le_bytes(raw);
    u64::try_from(value)
        .map_err(|_| StorageError::CorruptedData(format!("negative offset {value}")))
}
