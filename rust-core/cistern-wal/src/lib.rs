// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Cistern Write-Ahead Log (WAL) crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Records the in-place patches a commit is about to make to a collection
// file (rewritten record headers and the file header) so that a crash in
// the middle of patching can be repaired on the next open.
//
// # Architecture
//
// Each collection owns exactly one WAL file next to it (`<file>.wal`). The
// WAL never holds more than one committed entry: an entry is written at
// offset 0, fsynced, applied to the data file, and then the WAL is
// truncated. On open, the last complete entry (if any) is re-applied;
// re-applying is idempotent because each patch is a full overwrite.
//
// ## On-disk entry format (all integers little-endian)
//
// ```text
// [4 bytes: magic (u32)]          -- 0xDEAD10CC
// [8 bytes: length (i64)]         -- length of the record section
// [4 bytes: num_records (u32)]
// repeated num_records times:
//   [8 bytes: offset (i64)]       -- target offset in the data file
//   [8 bytes: size (i64)]
//   [size bytes: data]
// [4 bytes: footer magic (u32)]   -- !0xDEAD10CC
// [4 bytes: crc32 checksum]       -- CRC32 of the record section
// ```
//
// ## Usage
//
// ```no_run
// use cistern_wal::{WalEntry, WalFile};
//
// let mut wal = WalFile::create("/tmp/events.lm2.wal").unwrap();
//
// let mut entry = WalEntry::new();
// entry.push(0, vec![0u8; 48]);
// wal.append(&entry).unwrap();
//
// // ... patch the data file ...
// wal.truncate().unwrap();
// ```

pub mod entry;
pub mod error;
pub mod file;

pub use entry::{WalEntry, WalRecord, ENTRY_MAGIC, FOOTER_MAGIC};
pub use error::{WalError, WalResult};
pub use file::WalFile;
