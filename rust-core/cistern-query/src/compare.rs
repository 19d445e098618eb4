// SPDX-License-Identifier: PMPL-1.0-or-later
//! Value comparison for filters and result ordering.
//!
//! Two orders are used. [`compare`] backs filter conditions: values of the
//! same scalar kind compare naturally and everything else is `Less`.
//! [`total_order`] backs `order_by` and ranks kinds so any two values (or
//! missing fields) sort deterministically.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Filter comparison of `actual` against `expected`.
pub fn compare(actual: &Value, expected: &Value) -> Ordering {
    match (actual, expected) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b).unwrap_or(Ordering::Less),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Less,
    }
}

/// Filter equality. Scalars follow [`compare`], so `443` equals `443.0`;
/// arrays and objects are equal when structurally identical.
pub fn equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            actual == expected
        }
        _ => compare(actual, expected) == Ordering::Equal,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order over optional values: missing < null < bool < number <
/// string < array < object. Arrays and objects compare by their JSON text.
pub fn total_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ (Value::Array(_) | Value::Object(_))), Some(y))
            if kind_rank(Some(x)) == kind_rank(Some(y)) =>
        {
            x.to_string().cmp(&y.to_string())
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_same_kind_compares_naturally() {
        assert_eq!(compare(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(compare(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare(&json!(true), &json!(false)), Ordering::Greater);
        assert_eq!(compare(&json!(null), &json!(null)), Ordering::Equal);
    }

    #[test]
    fn test_mixed_kinds_are_less() {
        assert_eq!(compare(&json!("443"), &json!(443)), Ordering::Less);
        assert_eq!(compare(&json!(443), &json!("443")), Ordering::Less);
        assert_eq!(compare(&json!([1]), &json!([1])), Ordering::Less);
    }

    #[test]
    fn test_equality() {
        assert!(equals(&json!(443), &json!(443.0)));
        assert!(!equals(&json!(443), &json!("443")));
        assert!(equals(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})));
        assert!(!equals(&json!([1]), &json!([2])));
    }

    #[test]
    fn test_large_unsigned_numbers() {
        let big = json!(u64::MAX);
        let smaller = json!(u64::MAX - 1);
        assert_eq!(compare(&big, &smaller), Ordering::Greater);
    }

    #[test]
    fn test_total_order_ranks_kinds() {
        let ordered = [
            None,
            Some(json!(null)),
            Some(json!(false)),
            Some(json!(-1)),
            Some(json!(0.5)),
            Some(json!("a")),
            Some(json!([1])),
            Some(json!({"a": 1})),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                total_order(pair[0].as_ref(), pair[1].as_ref()),
                Ordering::Less,
                "{:?} < {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e9f64..1.0e9).prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::from),
            prop::collection::vec(any::<i8>(), 0..3).prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn test_total_order_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(total_order(Some(&a), Some(&b)), total_order(Some(&b), Some(&a)).reverse());
        }
    }
}
