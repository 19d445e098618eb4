// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query descriptions: the structured input of the engine.
//!
//! A textual query language compiles down to a [`QueryDesc`]; the engine
//! never sees query text.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// Aggregate functions over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Count,
    Min,
    Max,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Sum => write!(f, "sum"),
            Aggregate::Count => write!(f, "count"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
        }
    }
}

impl FromStr for Aggregate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Aggregate::Sum),
            "count" => Ok(Aggregate::Count),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            _ => Err(QueryError::Parse(format!("unknown aggregate {s:?}"))),
        }
    }
}

/// A column reference, optionally aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Aggregate>,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregate: None,
        }
    }

    pub fn aggregated(aggregate: Aggregate, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregate: Some(aggregate),
        }
    }

    /// Field name in result rows: `sum(x)` for aggregates, else the name.
    pub fn field_name(&self) -> String {
        match self.aggregate {
            Some(aggregate) => format!("{aggregate}({})", self.name),
            None => self.name.clone(),
        }
    }
}

/// One filter: `column <condition> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDesc {
    pub column: String,
    /// `=`, `!=`, `<`, `<=`, `>`, `>=` or `matches` (and word aliases).
    pub condition: String,
    pub value: Value,
}

impl FilterDesc {
    pub fn new(column: impl Into<String>, condition: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            condition: condition.into(),
            value: value.into(),
        }
    }
}

/// Inclusive time window. Unset bounds default to the epoch and to now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// A complete query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDesc {
    /// Columns to aggregate. Without aggregates, raw results are projected
    /// onto these columns.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnDesc>,
    pub time_range: TimeRange,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterDesc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<ColumnDesc>,
    /// Bucket width in microseconds; 0 disables time bucketing.
    #[serde(skip_serializing_if = "is_zero")]
    pub point_size: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<ColumnDesc>,
    #[serde(skip_serializing_if = "is_false")]
    pub descending: bool,
    /// Maximum rows returned; 0 means unlimited.
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub limit: usize,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl QueryDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, column: ColumnDesc) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_filter(mut self, filter: FilterDesc) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_group_by(mut self, name: impl Into<String>) -> Self {
        self.group_by.push(ColumnDesc::new(name));
        self
    }

    pub fn with_order_by(mut self, column: ColumnDesc) -> Self {
        self.order_by.push(column);
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_point_size(mut self, micros: i64) -> Self {
        self.point_size = micros;
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = TimeRange {
            start: Some(start),
            end: Some(end),
        };
        self
    }

    pub fn has_aggregates(&self) -> bool {
        self.columns.iter().any(|c| c.aggregate.is_some())
    }

    /// No grouping, aggregation or bucketing: matching events are returned as-is.
    pub fn is_raw(&self) -> bool {
        self.group_by.is_empty() && !self.has_aggregates() && self.point_size <= 0
    }

    /// Reject descriptions that cannot be executed.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.point_size < 0 {
            return Err(QueryError::Parse(format!(
                "point size must not be negative, got {}",
                self.point_size
            )));
        }
        if let (Some(start), Some(end)) = (self.time_range.start, self.time_range.end) {
            if start > end {
                return Err(QueryError::Parse(format!(
                    "time range starts ({start}) after it ends ({end})"
                )));
            }
        }
        for column in self.columns.iter().chain(&self.group_by).chain(&self.order_by) {
            if column.name.is_empty() {
                return Err(QueryError::Parse("empty column name".to_string()));
            }
        }
        if let Some(column) = self.group_by.iter().find(|c| c.aggregate.is_some()) {
            return Err(QueryError::Parse(format!(
                "cannot group by aggregate {}",
                column.field_name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_display_roundtrip() {
        for aggregate in [Aggregate::Sum, Aggregate::Count, Aggregate::Min, Aggregate::Max] {
            assert_eq!(aggregate.to_string().parse::<Aggregate>().unwrap(), aggregate);
        }
        assert_eq!("SUM".parse::<Aggregate>().unwrap(), Aggregate::Sum);
        assert!("avg".parse::<Aggregate>().is_err());
    }

    #[test]
    fn test_field_names() {
        assert_eq!(ColumnDesc::aggregated(Aggregate::Sum, "x").field_name(), "sum(x)");
        assert_eq!(ColumnDesc::new("x").field_name(), "x");
    }

    #[test]
    fn test_raw_mode_detection() {
        assert!(QueryDesc::new().is_raw());
        assert!(QueryDesc::new().with_column(ColumnDesc::new("x")).is_raw());
        assert!(!QueryDesc::new()
            .with_column(ColumnDesc::aggregated(Aggregate::Count, "x"))
            .is_raw());
        assert!(!QueryDesc::new().with_group_by("src").is_raw());
        assert!(!QueryDesc::new().with_point_size(60_000_000).is_raw());
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let desc: QueryDesc = serde_json::from_value(json!({
            "columns": [{"name": "bytes", "aggregate": "sum"}],
            "filters": [{"column": "port", "condition": "=", "value": 443}],
            "group_by": [{"name": "src"}],
            "limit": 10
        }))
        .unwrap();
        assert_eq!(desc.columns[0].aggregate, Some(Aggregate::Sum));
        assert_eq!(desc.filters[0].value, json!(443));
        assert_eq!(desc.limit, 10);
        assert!(desc.time_range.start.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(QueryDesc::new().validate().is_ok());
        assert!(QueryDesc::new().with_point_size(-1).validate().is_err());

        let mut desc = QueryDesc::new();
        desc.group_by.push(ColumnDesc::aggregated(Aggregate::Sum, "x"));
        assert!(desc.validate().is_err());
    }
}
