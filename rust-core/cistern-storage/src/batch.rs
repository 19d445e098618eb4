// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Write batches: the unit of atomic update for a collection.

use std::collections::{BTreeMap, BTreeSet};

/// A set of sets and deletes applied atomically by [`crate::Collection::update`].
///
/// Repeated sets of one key keep the last value. A key that is both set
/// and deleted in the same batch is treated as a plain set.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    sets: BTreeMap<Vec<u8>, Vec<u8>>,
    deletes: BTreeSet<Vec<u8>>,
    allow_overwrite: bool,
}

impl WriteBatch {
    /// An empty batch that allows overwriting live keys.
    pub fn new() -> Self {
        Self {
            sets: BTreeMap::new(),
            deletes: BTreeSet::new(),
            allow_overwrite: true,
        }
    }

    /// Set `key` to `value`.
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.sets.insert(key.into(), value.into());
        self
    }

    /// Delete `key`. Deleting a key that does not exist is a no-op.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.deletes.insert(key.into());
        self
    }

    /// When false, setting a key that is already live rolls the whole
    /// batch back with a duplicate-key error.
    pub fn allow_overwrite(&mut self, allow: bool) -> &mut Self {
        self.allow_overwrite = allow;
        self
    }

    pub fn allows_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    /// Number of distinct keys touched.
    pub fn len(&self) -> usize {
        self.sets.len() + self.deletes.iter().filter(|k| !self.sets.contains_key(*k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }

    /// Split into sorted sets and the deletes not shadowed by a set.
    pub(crate) fn into_parts(self) -> (BTreeMap<Vec<u8>, Vec<u8>>, BTreeSet<Vec<u8>>) {
        let Self {
            sets, mut deletes, ..
        } = self;
        deletes.retain(|key| !sets.contains_key(key));
        (sets, deletes)
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}
