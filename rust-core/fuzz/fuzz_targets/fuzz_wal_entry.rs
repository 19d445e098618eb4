// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for WAL entry decoding.
// Run with: cargo +nightly fuzz run fuzz_wal_entry
//
// Recovery decodes whatever the last write left in the WAL file, so the
// decoder must reject torn or corrupted input without panicking. Anything
// it accepts must re-encode to the same bytes.

#![no_main]

use cistern_wal::WalEntry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = WalEntry::deserialize(data) {
        let encoded = entry.serialize();
        assert_eq!(&data[..encoded.len()], encoded.as_slice());
    }
});
