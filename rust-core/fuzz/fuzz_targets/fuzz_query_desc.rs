// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Fuzz target for query descriptions.
// Run with: cargo +nightly fuzz run fuzz_query_desc
//
// Feeds arbitrary JSON to the query description parser and compiles the
// filters, covering condition parsing and regex compilation.

#![no_main]

use cistern_query::filter::compile_all;
use cistern_query::QueryDesc;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    if let Ok(desc) = serde_json::from_slice::<QueryDesc>(data) {
        let _ = desc.validate();
        let _ = compile_all(&desc.filters);
    }
});
