//! In-process predicate evaluation for the memory and file backends.
//!
//! The equality rules here are the reference semantics every backend must
//! reproduce: an EQ against an array is a membership test, an EQ against
//! `Null` matches null *and* absent values, and an EQ against `false` also
//! matches null/absent (the false≈null coalescing the SQL compiler mirrors
//! with `(col = false OR col IS NULL)`).

use std::cmp::Ordering;

use anymodel_core::{BoolOp, Comparator, Direction, OrderBy, Predicate, Record, Value};

/// Evaluate a predicate against one record.
#[must_use]
pub fn matches(predicate: &Predicate, record: &Record) -> bool {
    match predicate {
        Predicate::Compare { field, op, value } => {
            let row_value = record.get(field);
            match op {
                Comparator::Eq => eq_matches(value, row_value),
                Comparator::Ne => !eq_matches(value, row_value),
                Comparator::Lt | Comparator::Lte | Comparator::Gt | Comparator::Gte => {
                    ordering_matches(*op, value, row_value)
                }
            }
        }
        Predicate::Group { op, children } => match op {
            // Short-circuits false on the first failing child; empty AND
            // matches everything (the empty filter).
            BoolOp::And => children.iter().all(|c| matches(c, record)),
            // Short-circuits true on the first passing child; empty OR
            // matches nothing.
            BoolOp::Or => children.iter().any(|c| matches(c, record)),
        },
    }
}

/// The EQ comparison, with the coalescing rules spelled out.
fn eq_matches(pred_value: &Value, row_value: Option<&Value>) -> bool {
    match pred_value {
        // Membership test against each element, same rules per element.
        Value::Array(items) => items.iter().any(|item| eq_matches(item, row_value)),
        // NULL matches null and absent, nothing else.
        Value::Null => row_value.is_none_or(Value::is_null),
        // false matches false, null, and absent.
        Value::Bool(false) => match row_value {
            None => true,
            Some(Value::Null) => true,
            Some(Value::Bool(b)) => !*b,
            Some(_) => false,
        },
        other => match row_value {
            None | Some(Value::Null) => false,
            Some(row) => values_equal(other, row),
        },
    }
}

/// Scalar equality. Same-variant comparison, plus the one cross-variant rule
/// the SQL backends also apply: an integer equals a numeric string with the
/// same value.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Text(s)) | (Value::Text(s), Value::Int(i)) => {
            s.parse::<i64>().is_ok_and(|parsed| parsed == *i)
        }
        _ => a == b,
    }
}

fn ordering_matches(op: Comparator, pred_value: &Value, row_value: Option<&Value>) -> bool {
    let Some(row) = row_value else {
        return false;
    };
    let Some(ordering) = compare_order(row, pred_value) else {
        return false;
    };
    match op {
        Comparator::Lt => ordering == Ordering::Less,
        Comparator::Lte => ordering != Ordering::Greater,
        Comparator::Gt => ordering == Ordering::Greater,
        Comparator::Gte => ordering != Ordering::Less,
        Comparator::Eq | Comparator::Ne => unreachable!("handled by eq_matches"),
    }
}

/// Ordering comparison between a row value and a predicate value.
///
/// Returns `None` when either side is `Null`: a NULL operand matches no
/// ordering comparison, which is what the SQL backends do and what keeps the
/// cross-backend row sets identical. Between non-null values the order is
/// total: variants rank `Bool < Int < Text < Json < Array`, integers compare
/// numerically, strings lexicographically, and an integer against a numeric
/// string compares numerically.
#[must_use]
pub fn compare_order(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    Some(total_order(a, b))
}

fn variant_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Text(_) => 3,
        Value::Json(_) => 4,
        Value::Array(_) => 5,
    }
}

/// Total order over values, used for sorting. `Null` sorts before
/// everything, so ascending order puts missing values first (descending puts
/// them last).
fn total_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Int(x), Value::Text(s)) => match s.parse::<i64>() {
            Ok(parsed) => x.cmp(&parsed),
            Err(_) => Ordering::Less,
        },
        (Value::Text(s), Value::Int(y)) => match s.parse::<i64>() {
            Ok(parsed) => parsed.cmp(y),
            Err(_) => Ordering::Greater,
        },
        (Value::Json(x), Value::Json(y)) => x.to_string().cmp(&y.to_string()),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = total_order(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => variant_rank(a).cmp(&variant_rank(b)),
    }
}

/// Stable multi-key sort; the first key has the highest priority.
pub fn sort_records(records: &mut [Record], order: &OrderBy) {
    if order.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for (field, direction) in order {
            let av = a.get(field).unwrap_or(&Value::Null);
            let bv = b.get(field).unwrap_or(&Value::Null);
            let ord = total_order(av, bv);
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply offset (skip) then limit (cap) to an already-sorted result.
#[must_use]
pub fn apply_window(records: Vec<Record>, limit: Option<u64>, offset: Option<u64>) -> Vec<Record> {
    let skip = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let take = limit
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    records.into_iter().skip(skip).take(take).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anymodel_core::{Filter, Where};

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eq_basic() {
        let row = record(&[("foo", Value::Text("bar".into()))]);
        let p = Filter::by("foo", "bar").into_predicate();
        assert!(matches(&p, &row));
        let p = Filter::by("foo", "baz").into_predicate();
        assert!(!matches(&p, &row));
    }

    #[test]
    fn test_eq_null_matches_null_and_absent() {
        let p = Filter::by("bar", Value::Null).into_predicate();
        assert!(matches(&p, &record(&[("bar", Value::Null)])));
        assert!(matches(&p, &record(&[])));
        assert!(!matches(&p, &record(&[("bar", Value::Text("x".into()))])));
        assert!(!matches(&p, &record(&[("bar", Value::Bool(false))])));
    }

    #[test]
    fn test_eq_false_matches_false_null_and_absent() {
        let p = Filter::by("bar", false).into_predicate();
        assert!(matches(&p, &record(&[("bar", Value::Bool(false))])));
        assert!(matches(&p, &record(&[("bar", Value::Null)])));
        assert!(matches(&p, &record(&[])));
        assert!(!matches(&p, &record(&[("bar", Value::Bool(true))])));
        assert!(!matches(&p, &record(&[("bar", Value::Int(0))])));
    }

    #[test]
    fn test_ne_is_exact_negation_of_eq() {
        let w = Where::new().compare("bar", Comparator::Ne, false);
        let p = w.into_predicate();
        assert!(!matches(&p, &record(&[("bar", Value::Bool(false))])));
        assert!(!matches(&p, &record(&[])));
        assert!(matches(&p, &record(&[("bar", Value::Bool(true))])));
    }

    #[test]
    fn test_eq_array_is_membership() {
        let p = Filter::by("n", Value::Array(vec![Value::Int(1), Value::Int(3)])).into_predicate();
        assert!(matches(&p, &record(&[("n", Value::Int(3))])));
        assert!(!matches(&p, &record(&[("n", Value::Int(2))])));
        // Empty list matches nothing.
        let p = Filter::by("n", Value::Array(vec![])).into_predicate();
        assert!(!matches(&p, &record(&[("n", Value::Int(1))])));
    }

    #[test]
    fn test_int_text_numeric_equality() {
        let p = Filter::by("n", 5).into_predicate();
        assert!(matches(&p, &record(&[("n", Value::Text("5".into()))])));
        assert!(!matches(&p, &record(&[("n", Value::Text("5x".into()))])));
    }

    #[test]
    fn test_ordering_comparators() {
        let row = record(&[("age", Value::Int(21))]);
        let cases = [
            (Comparator::Gt, 18, true),
            (Comparator::Gte, 21, true),
            (Comparator::Lt, 21, false),
            (Comparator::Lte, 21, true),
            (Comparator::Gt, 21, false),
        ];
        for (op, bound, expected) in cases {
            let p = Where::new().compare("age", op, bound).into_predicate();
            assert_eq!(matches(&p, &row), expected, "{op:?} {bound}");
        }
    }

    #[test]
    fn test_ordering_against_null_matches_nothing() {
        let row = record(&[("age", Value::Null)]);
        for op in [Comparator::Lt, Comparator::Lte, Comparator::Gt, Comparator::Gte] {
            let p = Where::new().compare("age", op, 10).into_predicate();
            assert!(!matches(&p, &row));
            assert!(!matches(&p, &record(&[])));
        }
    }

    #[test]
    fn test_and_or_nesting() {
        let p = Where::new()
            .compare("kind", Comparator::Eq, "a")
            .or(|w| {
                w.compare("n", Comparator::Lt, 3)
                    .compare("n", Comparator::Gt, 10)
            })
            .into_predicate();

        assert!(matches(
            &p,
            &record(&[("kind", Value::Text("a".into())), ("n", Value::Int(2))])
        ));
        assert!(matches(
            &p,
            &record(&[("kind", Value::Text("a".into())), ("n", Value::Int(12))])
        ));
        assert!(!matches(
            &p,
            &record(&[("kind", Value::Text("a".into())), ("n", Value::Int(5))])
        ));
        assert!(!matches(
            &p,
            &record(&[("kind", Value::Text("b".into())), ("n", Value::Int(2))])
        ));
    }

    #[test]
    fn test_empty_groups() {
        let row = record(&[("x", Value::Int(1))]);
        // Empty AND (the empty filter) matches everything.
        assert!(matches(&Predicate::match_all(), &row));
        // Empty OR matches nothing.
        let empty_or = Where::new().or(|w| w).into_predicate();
        assert!(!matches(&empty_or, &row));
    }

    #[test]
    fn test_sort_records_multi_key() {
        let mut rows = vec![
            record(&[("a", Value::Int(1)), ("b", Value::Text("y".into()))]),
            record(&[("a", Value::Int(2)), ("b", Value::Text("x".into()))]),
            record(&[("a", Value::Int(1)), ("b", Value::Text("x".into()))]),
        ];
        sort_records(
            &mut rows,
            &vec![
                ("a".to_string(), Direction::Asc),
                ("b".to_string(), Direction::Desc),
            ],
        );
        assert_eq!(rows[0].get("b"), Some(&Value::Text("y".into())));
        assert_eq!(rows[1].get("b"), Some(&Value::Text("x".into())));
        assert_eq!(rows[2].get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_sort_desc_reverses_insertion_order() {
        let mut rows = vec![
            record(&[("bar", Value::Text("arg_a".into()))]),
            record(&[("bar", Value::Text("arg_b".into()))]),
            record(&[("bar", Value::Text("arg_c".into()))]),
        ];
        sort_records(&mut rows, &vec![("bar".to_string(), Direction::Desc)]);
        let names: Vec<_> = rows.iter().map(|r| r.get("bar").cloned()).collect();
        assert_eq!(
            names,
            vec![
                Some(Value::Text("arg_c".into())),
                Some(Value::Text("arg_b".into())),
                Some(Value::Text("arg_a".into())),
            ]
        );
    }

    #[test]
    fn test_apply_window() {
        let rows: Vec<Record> = (0..5)
            .map(|i| record(&[("id", Value::Int(i))]))
            .collect();
        let windowed = apply_window(rows.clone(), Some(2), Some(1));
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].get("id"), Some(&Value::Int(1)));

        let offset_only = apply_window(rows.clone(), None, Some(4));
        assert_eq!(offset_only.len(), 1);

        let limit_only = apply_window(rows, Some(3), None);
        assert_eq!(limit_only.len(), 3);
    }
}
