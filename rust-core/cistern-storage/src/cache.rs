// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Record cache for Cistern collections.
//
// Caches decoded records by file offset. Because record headers are patched
// in place on commit, every cache carries a generation counter: a reader
// samples the generation before going to disk and the cache refuses the
// record if a commit started patching in the meantime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::Rng;

use crate::record::Record;

/// Default number of records held by [`RandomAdmissionCache`].
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Probability that a record is admitted once the cache is full.
pub const ADMISSION_PROBABILITY: f64 = 0.1;

/// An offset-keyed cache of decoded records.
///
/// Implementations must be safe to share between the writer and any number
/// of concurrent cursors.
pub trait RecordCache: Send + Sync {
    /// Look up the record stored at `offset`.
    fn get(&self, offset: u64) -> Option<Arc<Record>>;

    /// Current generation. Even while idle, odd while a commit is patching.
    fn generation(&self) -> u64;

    /// Offer a record loaded from disk. `generation` is the value sampled
    /// before the load; the record is dropped unless it still matches.
    fn push(&self, record: Arc<Record>, generation: u64);

    /// The cached record with the greatest key, if any. Used as a shortcut
    /// into the skip list for appends of increasing keys.
    fn max_key_record(&self) -> Option<Arc<Record>>;

    /// Enter a patch window: loads started before this call can no longer
    /// be admitted.
    fn begin_patch(&self);

    /// Evict the records at `offsets` and close the patch window.
    fn end_patch(&self, offsets: &[u64]);

    /// Number of cached records, not counting the max-key record.
    fn len(&self) -> usize;

    /// True if no records are cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// RandomAdmissionCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheState {
    records: HashMap<u64, Arc<Record>>,
    max_key: Option<Arc<Record>>,
    generation: u64,
}

/// Bounded cache with random admission once full.
///
/// The record with the greatest key seen so far is pinned outside the
/// capacity limit; a newer max replaces it and the old one is dropped
/// without entering the bounded map. When full, a new record is admitted with probability
/// [`ADMISSION_PROBABILITY`] and an arbitrary resident is evicted to make
/// room.
pub struct RandomAdmissionCache {
    state: RwLock<CacheState>,
    capacity: usize,
}

impl RandomAdmissionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RandomAdmissionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl RecordCache for RandomAdmissionCache {
    fn get(&self, offset: u64) -> Option<Arc<Record>> {
        let state = self.state.read().ok()?;
        if let Some(max) = state.max_key.as_ref().filter(|r| r.offset == offset) {
            return Some(Arc::clone(max));
        }
        state.records.get(&offset).cloned()
    }

    fn generation(&self) -> u64 {
        // A poisoned cache reports an odd generation so nothing is admitted.
        self.state.read().map(|s| s.generation).unwrap_or(1)
    }

    fn push(&self, record: Arc<Record>, generation: u64) {
        let Ok(mut state) = self.state.write() else {
            return;
        };
        if generation % 2 == 1 || state.generation != generation {
            return;
        }

        let is_new_max = state
            .max_key
            .as_ref()
            .map_or(true, |max| record.key >= max.key);
        if is_new_max {
            // The bounded map is left alone; the displaced max is dropped.
            state.max_key = Some(record);
            return;
        }

        if self.capacity == 0 || state.records.contains_key(&record.offset) {
            return;
        }
        if state.records.len() >= self.capacity {
            if !rand::thread_rng().gen_bool(ADMISSION_PROBABILITY) {
                return;
            }
            // HashMap iteration order is arbitrary, which is all we need.
            if let Some(victim) = state.records.keys().next().copied() {
                state.records.remove(&victim);
            }
        }
        state.records.insert(record.offset, record);
    }

    fn max_key_record(&self) -> Option<Arc<Record>> {
        self.state.read().ok()?.max_key.clone()
    }

    fn begin_patch(&self) {
        if let Ok(mut state) = self.state.write() {
            state.generation = state.generation.wrapping_add(1) | 1;
        }
    }

    fn end_patch(&self, offsets: &[u64]) {
        if let Ok(mut state) = self.state.write() {
            for offset in offsets {
                state.records.remove(offset);
            }
            if state
                .max_key
                .as_ref()
                .is_some_and(|max| offsets.contains(&max.offset))
            {
                state.max_key = None;
            }
            state.generation = state.generation.wrapping_add(1) & !1;
        }
    }

    fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(offset: u64, key: &str) -> Arc<Record> {
        Arc::new(Record::new(offset, 0, key.as_bytes().to_vec(), b"v".to_vec()))
    }

    #[test]
    fn test_push_and_get() {
        let cache = RandomAdmissionCache::new(16);
        let g = cache.generation();
        cache.push(test_record(600, "b"), g);
        cache.push(test_record(700, "a"), g);

        assert_eq!(cache.get(600).unwrap().key, b"b");
        assert_eq!(cache.get(700).unwrap().key, b"a");
        assert!(cache.get(800).is_none());
    }

    #[test]
    fn test_max_key_is_pinned() {
        let cache = RandomAdmissionCache::new(0);
        let g = cache.generation();
        cache.push(test_record(600, "m"), g);
        cache.push(test_record(700, "a"), g);
        cache.push(test_record(800, "z"), g);

        assert_eq!(cache.max_key_record().unwrap().offset, 800);
        assert!(cache.get(700).is_none(), "Zero capacity admits only the max");
        assert!(cache.get(800).is_some());
    }

    #[test]
    fn test_new_max_leaves_bounded_map_alone() {
        let cache = RandomAdmissionCache::new(16);
        let g = cache.generation();
        cache.push(test_record(600, "a"), g);
        cache.push(test_record(700, "b"), g);
        cache.push(test_record(800, "c"), g);

        assert_eq!(cache.max_key_record().unwrap().offset, 800);
        assert!(cache.is_empty(), "Displaced max records are not admitted");
        assert!(cache.get(600).is_none());
        assert!(cache.get(700).is_none());
    }

    #[test]
    fn test_capacity_is_respected() {
        let cache = RandomAdmissionCache::new(8);
        let g = cache.generation();
        // Descending keys so nothing becomes the pinned max after the first.
        for i in 0..1000u64 {
            cache.push(test_record(1000 + i, &format!("{:04}", 9999 - i)), g);
        }
        assert!(cache.len() <= 8);
    }

    #[test]
    fn test_patch_window_rejects_stale_loads() {
        let cache = RandomAdmissionCache::new(16);
        let before = cache.generation();

        cache.begin_patch();
        cache.push(test_record(600, "a"), before);
        assert!(cache.get(600).is_none(), "Load overlapping a patch");

        let during = cache.generation();
        assert_eq!(during % 2, 1);
        cache.push(test_record(600, "a"), during);
        assert!(cache.get(600).is_none(), "Load during a patch");

        cache.end_patch(&[]);
        let after = cache.generation();
        assert_eq!(after % 2, 0);
        assert_ne!(after, before);
        cache.push(test_record(600, "a"), after);
        assert!(cache.get(600).is_some());
    }

    #[test]
    fn test_end_patch_evicts_offsets() {
        let cache = RandomAdmissionCache::new(16);
        let g = cache.generation();
        cache.push(test_record(600, "z"), g);
        cache.push(test_record(700, "a"), g);

        cache.begin_patch();
        cache.end_patch(&[600, 700]);

        assert!(cache.get(700).is_none());
        assert!(cache.max_key_record().is_none());
        assert!(cache.is_empty());
    }
}
