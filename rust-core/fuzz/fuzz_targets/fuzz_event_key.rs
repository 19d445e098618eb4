// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for event key decoding.
// Run with: cargo +nightly fuzz run fuzz_event_key

#![no_main]

use cistern_events::EventKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = EventKey::decode(data) {
        // The tag ends at the first separator, so decoding is lossless.
        assert_eq!(key.encode(), data);
        let _ = key.id();
    }
});
