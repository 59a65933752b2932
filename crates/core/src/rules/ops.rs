//! Comparison semantics shared by eligibility criteria and compliance rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Closed set of comparison operators. Unknown names fail at deserialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
    Contains,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Gte => "gte",
            ComparisonOp::Lte => "lte",
            ComparisonOp::In => "in",
            ComparisonOp::NotIn => "notIn",
            ComparisonOp::Contains => "contains",
        }
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a dotted path against a JSON document.
///
/// Walking into an array projects the remaining path over its elements, so
/// `diagnoses.code` yields the array of every diagnosis code. Missing keys and `null` values
/// resolve to `None`.
pub fn resolve_path(document: &Value, path: &str) -> Option<Value> {
    let mut current = document.clone();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(items) => {
                let projected: Vec<Value> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(mut map) => map.remove(segment),
                        _ => None,
                    })
                    .flat_map(|v| match v {
                        Value::Array(inner) => inner,
                        other => vec![other],
                    })
                    .filter(|v| !v.is_null())
                    .collect();
                Value::Array(projected)
            }
            _ => return None,
        };
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Equality with numbers compared by value, so `18` equals `18.0`.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        _ => a == b,
    }
}

/// Order two scalars of the same kind. Mixed kinds have no order.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn member(set: &Value, candidate: &Value) -> Option<bool> {
    let items = set.as_array()?;
    let is_member = |v: &Value| items.iter().any(|item| json_equal(item, v));
    Some(match candidate {
        Value::Array(candidates) => candidates.iter().any(is_member),
        scalar => is_member(scalar),
    })
}

/// Apply `op` to an already-resolved value.
///
/// A missing value never satisfies any operator, including `notIn`. For a projected array,
/// `in` holds when any element is in the set and `notIn` when none is. `contains` checks array
/// membership by deep equality, or substring containment when both sides are strings.
pub fn compare(op: ComparisonOp, actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual.filter(|v| !v.is_null()) else {
        return false;
    };

    match op {
        ComparisonOp::Eq => json_equal(actual, expected),
        ComparisonOp::Gt => order(actual, expected) == Some(Ordering::Greater),
        ComparisonOp::Lt => order(actual, expected) == Some(Ordering::Less),
        ComparisonOp::Gte => matches!(
            order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ComparisonOp::Lte => matches!(
            order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ComparisonOp::In => member(expected, actual).unwrap_or(false),
        ComparisonOp::NotIn => member(expected, actual).map(|m| !m).unwrap_or(false),
        ComparisonOp::Contains => match (actual, expected) {
            (Value::Array(items), needle) => items.iter().any(|item| json_equal(item, needle)),
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            _ => false,
        },
    }
}
