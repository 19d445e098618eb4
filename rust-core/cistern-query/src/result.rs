// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query results.

use cistern_events::Event;
use serde::{Deserialize, Serialize};

use crate::desc::QueryDesc;

/// Field carrying the short hash of a result row's group key.
pub const GROUP_ID_FIELD: &str = "_group_id";

/// Output of one query.
///
/// Raw queries fill `events`. Aggregating queries fill `summary` (one row
/// per group) and, when a bucket width is set, `series` (one row per bucket
/// and group, keyed by `_ts`). `query` echoes the description with the time
/// range resolved.
///
/// A bucketed query therefore returns two non-empty sections: the series
/// and the whole-range totals in `summary`. Clients that only chart the
/// series can ignore `summary`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub summary: Vec<Event>,
    pub series: Vec<Event>,
    pub events: Vec<Event>,
    pub query: QueryDesc,
}

impl ResultSet {
    /// Total rows across all three sections.
    pub fn len(&self) -> usize {
        self.summary.len() + self.series.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
