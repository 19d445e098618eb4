// SPDX-License-Identifier: PMPL-1.0-or-later
//! Gauge and counter-derivative state for metrics derived from events.
//!
//! Counter rollover: when a counter sample is lower than the previous one
//! (wrap or device restart) the interval reports a rate of 0 and the new
//! sample becomes the baseline. The first sample of a counter only sets
//! the baseline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last observed value.
    Gauge,
    /// Per-second rate of a monotonically increasing counter.
    Derivative,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Derivative => write!(f, "derivative"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "derivative" | "counter" => Ok(MetricKind::Derivative),
            _ => Err(QueryError::Parse(format!("unknown metric kind {s:?}"))),
        }
    }
}

/// Name and kind of a tracked metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricState {
    Gauge {
        value: Option<f64>,
    },
    Derivative {
        counter: Option<(u64, DateTime<Utc>)>,
        rate: Option<f64>,
    },
}

impl MetricState {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => MetricState::Gauge { value: None },
            MetricKind::Derivative => MetricState::Derivative {
                counter: None,
                rate: None,
            },
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricState::Gauge { .. } => MetricKind::Gauge,
            MetricState::Derivative { .. } => MetricKind::Derivative,
        }
    }

    /// Record a sample observed at `at`. Returns false when the sample was
    /// ignored: non-numeric, a negative or fractional counter, or a counter
    /// sample not newer than the previous one.
    pub fn update(&mut self, sample: &Value, at: DateTime<Utc>) -> bool {
        match self {
            MetricState::Gauge { value } => match sample.as_f64() {
                Some(x) => {
                    *value = Some(x);
                    true
                }
                None => false,
            },
            MetricState::Derivative { counter, rate } => {
                let Some(current) = sample.as_u64() else {
                    return false;
                };
                if let Some((previous, since)) = *counter {
                    let Some(elapsed) = (at - since).num_microseconds().filter(|us| *us > 0) else {
                        return false;
                    };
                    *rate = Some(if current < previous {
                        0.0
                    } else {
                        (current - previous) as f64 * 1_000_000.0 / elapsed as f64
                    });
                }
                *counter = Some((current, at));
                true
            }
        }
    }

    /// Current value; `None` until a gauge has a sample or a counter has
    /// two.
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricState::Gauge { value } => *value,
            MetricState::Derivative { rate, .. } => *rate,
        }
    }
}

/// Metric states keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    metrics: HashMap<String, MetricState>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample to `name`, creating its state on first use. A sample
    /// of a different kind than the tracked state starts it over.
    ///
    /// Returns the value after the sample, or `None` if the sample was
    /// ignored or the metric has no value yet.
    pub fn update(
        &mut self,
        name: &str,
        kind: MetricKind,
        sample: &Value,
        at: DateTime<Utc>,
    ) -> Option<f64> {
        let state = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricState::new(kind));
        if state.kind() != kind {
            *state = MetricState::new(kind);
        }
        if !state.update(sample, at) {
            return None;
        }
        state.value()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricState::value)
    }

    /// Tracked metrics, sorted by name.
    pub fn definitions(&self) -> Vec<MetricDefinition> {
        let mut definitions: Vec<MetricDefinition> = self
            .metrics
            .iter()
            .map(|(name, state)| MetricDefinition {
                name: name.clone(),
                kind: state.kind(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
