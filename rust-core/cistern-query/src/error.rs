// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query error types.

use cistern_events::EventError;
use cistern_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while executing a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query description is malformed. Raised before any scan.
    #[error("invalid query: {0}")]
    Parse(String),

    /// A `matches` filter carries an invalid regular expression.
    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    /// True if the query was rejected without touching the store.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Regex { .. })
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
