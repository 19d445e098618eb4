// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skip-list traversal shared by the writer (which sees its own uncommitted
// link changes) and cursors (which see the file as of their snapshot).

use std::ops::Deref;
use std::sync::Arc;

use rand::Rng;

use crate::error::StorageResult;
use crate::record::{Record, LEVEL_PROBABILITY, MAX_LEVELS};

/// A record either borrowed from a writer's working set or shared from the
/// cache/disk.
pub(crate) enum RecordRef<'a> {
    Borrowed(&'a Record),
    Shared(Arc<Record>),
}

impl Deref for RecordRef<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        match self {
            Self::Borrowed(record) => record,
            Self::Shared(record) => record,
        }
    }
}

/// A view of the skip list that can be walked.
pub(crate) trait RecordSource {
    /// The record at `offset`.
    fn record(&self, offset: u64) -> StorageResult<RecordRef<'_>>;

    /// First record at `level`, 0 if the level is empty.
    fn head(&self, level: usize) -> u64;

    /// A record known to be linked at `level` that a search may jump to
    /// instead of starting from the head.
    fn shortcut(&self, level: usize) -> Option<Arc<Record>>;
}

/// Find the last record at `level` whose key is before `key`.
///
/// "Before" means `<=` when `inclusive` and `<` otherwise. The search starts
/// at `start` when given (whose key must already be before `key`),
/// otherwise at the level head or the source's shortcut. Returns `None` if
/// no record at this level is before `key`.
pub(crate) fn find_predecessor<S>(
    source: &S,
    key: &[u8],
    start: Option<u64>,
    level: usize,
    inclusive: bool,
) -> StorageResult<Option<u64>>
where
    S: RecordSource + ?Sized,
{
    let before = |candidate: &[u8]| {
        if inclusive {
            candidate <= key
        } else {
            candidate < key
        }
    };

    let mut current = match start {
        Some(offset) => offset,
        None => {
            let head = source.head(level);
            if head == 0 {
                return Ok(None);
            }
            let first = source.record(head)?;
            if !before(&first.key) {
                return Ok(None);
            }
            match source.shortcut(level) {
                Some(max) if before(&max.key) && max.key > first.key => max.offset,
                _ => head,
            }
        }
    };

    loop {
        let next = source.record(current)?.next[level];
        if next == 0 || !before(&source.record(next)?.key) {
            return Ok(Some(current));
        }
        current = next;
    }
}

/// Pick the height of a new record: level `n` with probability
/// `LEVEL_PROBABILITY^n`, capped at the top level.
pub(crate) fn random_height<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    let mut height = 0u8;
    while (height as usize) < MAX_LEVELS - 1 && rng.gen_bool(LEVEL_PROBABILITY) {
        height += 1;
    }
    height
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory list: keys at offsets 100, 200, ...; every record at level
    /// 0, every third at level 1.
    struct MemoryList {
        records: HashMap<u64, Record>,
        heads: [u64; MAX_LEVELS],
    }

    impl MemoryList {
        fn new(keys: &[&str]) -> Self {
            let mut records = HashMap::new();
            let mut heads = [0u64; MAX_LEVELS];
            let mut last: [Option<u64>; MAX_LEVELS] = [None; MAX_LEVELS];
            for (i, key) in keys.iter().enumerate() {
                let offset = (i as u64 + 1) * 100;
                let height = if i % 3 == 0 { 1 } else { 0 };
                records.insert(
                    offset,
                    Record::new(offset, height, key.as_bytes().to_vec(), Vec::new()),
                );
                for level in 0..=height as usize {
                    match last[level] {
                        Some(prev) => records.get_mut(&prev).unwrap().next[level] = offset,
                        None => heads[level] = offset,
                    }
                    last[level] = Some(offset);
                }
            }
            Self { records, heads }
        }
    }

    impl RecordSource for MemoryList {
        fn record(&self, offset: u64) -> StorageResult<RecordRef<'_>> {
            Ok(RecordRef::Borrowed(&self.records[&offset]))
        }

        fn head(&self, level: usize) -> u64 {
            self.heads[level]
        }

        fn shortcut(&self, _level: usize) -> Option<Arc<Record>> {
            None
        }
    }

    fn search(list: &MemoryList, key: &str, inclusive: bool) -> Option<u64> {
        let mut above = None;
        for level in (0..MAX_LEVELS).rev() {
            above = find_predecessor(list, key.as_bytes(), above, level, inclusive).unwrap();
        }
        above
    }

    #[test]
    fn test_inclusive_search_finds_equal_key() {
        let list = MemoryList::new(&["a", "c", "e", "g", "i"]);
        assert_eq!(search(&list, "e", true), Some(300));
        assert_eq!(search(&list, "f", true), Some(300));
    }

    #[test]
    fn test_strict_search_stops_before_equal_key() {
        let list = MemoryList::new(&["a", "c", "e", "g", "i"]);
        assert_eq!(search(&list, "e", false), Some(200));
        assert_eq!(search(&list, "a", false), None);
    }

    #[test]
    fn test_search_past_either_end() {
        let list = MemoryList::new(&["b", "d"]);
        assert_eq!(search(&list, "a", true), None);
        assert_eq!(search(&list, "z", true), Some(200));
    }

    #[test]
    fn test_empty_list() {
        let list = MemoryList::new(&[]);
        assert_eq!(search(&list, "k", true), None);
    }

    #[test]
    fn test_random_height_is_bounded() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            assert!((random_height(&mut rng) as usize) < MAX_LEVELS);
        }
    }
}
