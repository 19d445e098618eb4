// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-group aggregate accumulators.

use cistern_events::Event;
use serde_json::Value;

use crate::desc::{Aggregate, ColumnDesc};

/// One slot per query column. Slots start as NaN ("no value yet"); slots
/// of non-aggregate columns stay NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    slots: Vec<f64>,
}

impl Accumulator {
    pub fn new(columns: usize) -> Self {
        Self {
            slots: vec![f64::NAN; columns],
        }
    }

    /// Fold one matching event into the slots.
    ///
    /// `count` counts every row; `sum` treats a missing or non-numeric field
    /// as 0; `min` and `max` skip it.
    pub fn update(&mut self, columns: &[ColumnDesc], event: &Event) {
        for (slot, column) in self.slots.iter_mut().zip(columns) {
            let Some(aggregate) = column.aggregate else {
                continue;
            };
            let sample = event.get(&column.name).and_then(Value::as_f64);
            match aggregate {
                Aggregate::Count => *slot = zero_if_unset(*slot) + 1.0,
                Aggregate::Sum => *slot = zero_if_unset(*slot) + sample.unwrap_or(0.0),
                Aggregate::Min => {
                    if let Some(x) = sample {
                        if slot.is_nan() || x < *slot {
                            *slot = x;
                        }
                    }
                }
                Aggregate::Max => {
                    if let Some(x) = sample {
                        if slot.is_nan() || x > *slot {
                            *slot = x;
                        }
                    }
                }
            }
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.slots
    }
}

fn zero_if_unset(slot: f64) -> f64 {
    if slot.is_nan() {
        0.0
    } else {
        slot
    }
}

/// JSON form of an aggregate. Integral values become integers, NaN and
/// infinities become null.
pub fn to_json(value: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= EXACT {
        return Value::from(value as i64);
    }
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<ColumnDesc> {
        vec![
            ColumnDesc::aggregated(Aggregate::Sum, "x"),
            ColumnDesc::aggregated(Aggregate::Count, "x"),
            ColumnDesc::aggregated(Aggregate::Min, "x"),
            ColumnDesc::aggregated(Aggregate::Max, "x"),
            ColumnDesc::new("x"),
        ]
    }

    #[test]
    fn test_accumulates() {
        let columns = columns();
        let mut acc = Accumulator::new(columns.len());
        for x in [json!(3), json!(-1.5), json!("n/a")] {
            acc.update(&columns, &Event::new().with("x", x));
        }
        acc.update(&columns, &Event::new());

        let values = acc.values();
        assert_eq!(values[0], 1.5);
        assert_eq!(values[1], 4.0);
        assert_eq!(values[2], -1.5);
        assert_eq!(values[3], 3.0);
        assert!(values[4].is_nan());
    }

    #[test]
    fn test_min_max_without_numbers_stay_unset() {
        let columns = columns();
        let mut acc = Accumulator::new(columns.len());
        acc.update(&columns, &Event::new().with("x", "text"));
        assert_eq!(acc.values()[0], 0.0);
        assert!(acc.values()[2].is_nan());
        assert_eq!(to_json(acc.values()[2]), Value::Null);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(to_json(3.0), json!(3));
        assert_eq!(to_json(-2.0), json!(-2));
        assert_eq!(to_json(0.25), json!(0.25));
        assert_eq!(to_json(f64::NAN), Value::Null);
        assert_eq!(to_json(f64::INFINITY), Value::Null);
    }
}
