// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation counters for a collection handle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated over the lifetime of a collection handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    /// Records appended by committed batches.
    pub records_written: u64,
    /// Records fetched, from cache or disk.
    pub records_read: u64,
    /// Record fetches served by the cache.
    pub cache_hits: u64,
    /// Record fetches that went to disk.
    pub cache_misses: u64,
}

/// Lock-free accumulator behind [`CollectionStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    records_written: AtomicU64,
    records_read: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn written(&self, n: u64) {
        self.records_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn hit(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CollectionStats {
        CollectionStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}
