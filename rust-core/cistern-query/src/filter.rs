// SPDX-License-Identifier: PMPL-1.0-or-later
//! Compiled filter predicates.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use cistern_events::Event;
use regex::Regex;
use serde_json::Value;

use crate::compare::{compare, equals};
use crate::desc::FilterDesc;
use crate::error::{QueryError, QueryResult};

/// Filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Matches,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Condition::Equal => "=",
            Condition::NotEqual => "!=",
            Condition::Less => "<",
            Condition::LessOrEqual => "<=",
            Condition::Greater => ">",
            Condition::GreaterOrEqual => ">=",
            Condition::Matches => "matches",
        };
        f.write_str(symbol)
    }
}

impl FromStr for Condition {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Condition::Equal),
            "!=" | "<>" | "neq" | "ne" => Ok(Condition::NotEqual),
            "<" | "lt" => Ok(Condition::Less),
            "<=" | "lte" | "le" => Ok(Condition::LessOrEqual),
            ">" | "gt" => Ok(Condition::Greater),
            ">=" | "gte" | "ge" => Ok(Condition::GreaterOrEqual),
            "matches" | "~" | "=~" => Ok(Condition::Matches),
            _ => Err(QueryError::Parse(format!("unknown filter condition {s:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
enum Test {
    Compare(Condition, Value),
    Matches(Regex),
}

/// A filter ready to run against events.
#[derive(Debug, Clone)]
pub struct Filter {
    column: String,
    test: Test,
}

impl Filter {
    /// Compile a filter, parsing the condition and any regular expression.
    pub fn compile(desc: &FilterDesc) -> QueryResult<Self> {
        if desc.column.is_empty() {
            return Err(QueryError::Parse("filter has an empty column".to_string()));
        }
        let condition: Condition = desc.condition.parse()?;
        let test = match condition {
            Condition::Matches => {
                let Some(pattern) = desc.value.as_str() else {
                    return Err(QueryError::Parse(format!(
                        "matches filter on {:?} needs a string pattern, got {}",
                        desc.column, desc.value
                    )));
                };
                let regex = Regex::new(pattern).map_err(|source| QueryError::Regex {
                    pattern: pattern.to_string(),
                    source,
                })?;
                Test::Matches(regex)
            }
            other => Test::Compare(other, desc.value.clone()),
        };
        Ok(Self {
            column: desc.column.clone(),
            test,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// True if `event` passes. Events lacking the column never pass.
    pub fn matches(&self, event: &Event) -> bool {
        let Some(actual) = event.get(&self.column) else {
            return false;
        };
        match &self.test {
            Test::Matches(regex) => actual.as_str().is_some_and(|s| regex.is_match(s)),
            Test::Compare(condition, expected) => match condition {
                Condition::Equal => equals(actual, expected),
                Condition::NotEqual => !equals(actual, expected),
                Condition::Less => compare(actual, expected) == Ordering::Less,
                Condition::LessOrEqual => compare(actual, expected) != Ordering::Greater,
                Condition::Greater => compare(actual, expected) == Ordering::Greater,
                Condition::GreaterOrEqual => compare(actual, expected) != Ordering::Less,
                Condition::Matches => false,
            },
        }
    }
}

/// Compile every filter, failing on the first bad one.
pub fn compile_all(filters: &[FilterDesc]) -> QueryResult<Vec<Filter>> {
    filters.iter().map(Filter::compile).collect()
}
