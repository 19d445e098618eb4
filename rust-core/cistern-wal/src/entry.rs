// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Cistern Write-Ahead Log - Entry types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A WAL entry is an ordered list of (offset, bytes) patches against a
// collection file. Provides binary serialization/deserialization for the
// on-disk format with magic numbers at both ends and a CRC32 over the
// record section.

use crc32fast::Hasher as Crc32Hasher;

use crate::error::{WalError, WalResult};

/// Magic number opening every WAL entry.
pub const ENTRY_MAGIC: u32 = 0xDEAD_10CC;

/// Magic number closing every WAL entry.
pub const FOOTER_MAGIC: u32 = !ENTRY_MAGIC;

/// magic + length + num_records.
pub const ENTRY_HEADER_SIZE: usize = 4 + 8 + 4;

/// offset + size, preceding each record's data.
pub const RECORD_HEADER_SIZE: usize = 8 + 8;

/// footer magic + crc32.
pub const ENTRY_FOOTER_SIZE: usize = 4 + 4;

// ---------------------------------------------------------------------------
// WalRecord
// ---------------------------------------------------------------------------

/// One patch: write `data` at `offset` in the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Absolute byte offset in the data file.
    pub offset: u64,
    /// Bytes to write at `offset`.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// WalEntry
// ---------------------------------------------------------------------------

/// The set of patches making up one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalEntry {
    records: Vec<WalRecord>,
}

impl WalEntry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a patch. Patches are applied in insertion order.
    pub fn push(&mut self, offset: u64, data: Vec<u8>) {
        self.records.push(WalRecord { offset, data });
    }

    /// The patches in application order.
    pub fn records(&self) -> &[WalRecord] {
        &self.records
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the entry carries no patches.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize this entry to the on-disk binary format.
    pub fn serialize(&self) -> Vec<u8> {
        let body_len: usize = self
            .records
            .iter()
            .map(|r| RECORD_HEADER_SIZE + r.data.len())
            .sum();

        let mut body = Vec::with_capacity(body_len);
        for record in &self.records {
            body.extend_from_slice(&(record.offset as i64).to_le_bytes());
            body.extend_from_slice(&(record.data.len() as i64).to_le_bytes());
            body.extend_from_slice(&record.data);
        }

        let mut buffer = Vec::with_capacity(ENTRY_HEADER_SIZE + body.len() + ENTRY_FOOTER_SIZE);
        buffer.extend_from_slice(&ENTRY_MAGIC.to_le_bytes());
        buffer.extend_from_slice(&(body.len() as i64).to_le_bytes());
        buffer.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&body);
        buffer.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
        buffer.extend_from_slice(&compute_crc32(&body).to_le_bytes());
        buffer
    }

    /// Deserialize an entry from the start of `data`.
    ///
    /// Any trailing bytes after the footer are ignored.
    pub fn deserialize(data: &[u8]) -> WalResult<Self> {
        let mut reader = ByteReader::new(data);

        let magic = reader.u32()?;
        if magic != ENTRY_MAGIC {
            return Err(WalError::BadMagic {
                section: "header",
                expected: ENTRY_MAGIC,
                found: magic,
            });
        }

        let length = reader.i64()?;
        let length = usize::try_from(length)
            .map_err(|_| WalError::Malformed(format!("negative record section length {length}")))?;
        let num_records = reader.u32()? as usize;

        let body = reader.take(length)?;

        let footer = reader.u32()?;
        if footer != FOOTER_MAGIC {
            return Err(WalError::BadMagic {
                section: "footer",
                expected: FOOTER_MAGIC,
                found: footer,
            });
        }

        let stored_crc = reader.u32()?;
        let computed_crc = compute_crc32(body);
        if stored_crc != computed_crc {
            return Err(WalError::CrcMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        Self::parse_records(body, num_records)
    }

    /// Parse the record section (after CRC verification).
    fn parse_records(body: &[u8], num_records: usize) -> WalResult<Self> {
        let mut reader = ByteReader::new(body);
        // Each record needs at least its 16-byte prefix.
        let mut records = Vec::with_capacity(num_records.min(body.len() / RECORD_HEADER_SIZE));

        for _ in 0..num_records {
            let offset = reader.i64()?;
            let offset = u64::try_from(offset)
                .map_err(|_| WalError::Malformed(format!("negative patch offset {offset}")))?;
            let size = reader.i64()?;
            let size = usize::try_from(size)
                .map_err(|_| WalError::Malformed(format!("negative patch size {size}")))?;
            let data = reader.take(size)?.to_vec();
            records.push(WalRecord { offset, data });
        }

        if reader.remaining() != 0 {
            return Err(WalError::Malformed(format!(
                "{} unused bytes after {num_records} records",
                reader.remaining()
            )));
        }

        Ok(Self { records })
    }
}

/// Compute a CRC32 checksum over the given byte slice using the IEEE
/// polynomial (same as zlib/gzip).
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// ByteReader
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian cursor over a byte slice.
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, len: usize) -> WalResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(WalError::Truncated {
                needed: (self.position as u64).saturating_add(len as u64),
                available: self.data.len() as u64,
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> WalResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> WalResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> WalResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}
