//! Hybrid merge of a fallback answer with a low-confidence AI answer.
//!
//! `merge(fallback, ai)` is total over JSON values:
//! - object + object: fallback fields first; each non-null AI field overrides at the top level,
//!   except that two arrays under the same key are combined with [`union_by_id`]
//! - array + array: [`union_by_id`]
//! - anything else: the AI value, unless it is `null`
//!
//! Nested objects are replaced wholesale, never merged recursively.

use serde_json::{Map, Value};

pub fn merge(fallback: Value, ai: Value) -> Value {
    match (fallback, ai) {
        (fallback, Value::Null) => fallback,
        (Value::Object(fb), Value::Object(ai)) => Value::Object(merge_objects(fb, ai)),
        (Value::Array(fb), Value::Array(ai)) => Value::Array(union_by_id(fb, ai)),
        (_, ai) => ai,
    }
}

fn merge_objects(mut fallback: Map<String, Value>, ai: Map<String, Value>) -> Map<String, Value> {
    for (key, ai_value) in ai {
        if ai_value.is_null() {
            continue;
        }
        let merged = match (fallback.remove(&key), ai_value) {
            (Some(Value::Array(fb)), Value::Array(ai)) => Value::Array(union_by_id(fb, ai)),
            (_, ai) => ai,
        };
        fallback.insert(key, merged);
    }
    fallback
}

/// Identity of an array item: its `id` field when that is a string or a number.
fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Union of two arrays keyed by item id.
///
/// Fallback order is kept and a fallback item is replaced in place by the AI item sharing its
/// id. Remaining AI items are appended in AI order. Items without an id are appended unless a
/// deep-equal item is already present.
pub fn union_by_id(fallback: Vec<Value>, ai: Vec<Value>) -> Vec<Value> {
    let mut merged = fallback;

    for ai_item in ai {
        match item_id(&ai_item) {
            Some(id) => {
                match merged
                    .iter()
                    .position(|existing| item_id(existing).as_deref() == Some(id.as_str()))
                {
                    Some(pos) => merged[pos] = ai_item,
                    None => merged.push(ai_item),
                }
            }
            None => {
                if !merged.contains(&ai_item) {
                    merged.push(ai_item);
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_ai_fields_override() {
        let fallback = json!({ "summary": "rule based", "severity": "low", "source": "rules" });
        let ai = json!({ "summary": "model", "severity": null, "extra": { "a": 1 } });

        assert_eq!(
            merge(fallback, ai),
            json!({ "summary": "model", "severity": "low", "source": "rules", "extra": { "a": 1 } })
        );
    }

    #[test]
    fn test_nested_objects_replaced_wholesale() {
        let fallback = json!({ "detail": { "a": 1, "b": 2 } });
        let ai = json!({ "detail": { "a": 9 } });
        assert_eq!(merge(fallback, ai), json!({ "detail": { "a": 9 } }));
    }

    #[test]
    fn test_arrays_union_by_id_with_ai_winning() {
        let fallback = json!({
            "recommendations": [
                { "id": "monitor", "rationale": "fallback" },
                { "id": "refer", "rationale": "fallback" }
            ]
        });
        let ai = json!({
            "recommendations": [
                { "id": "refer", "rationale": "ai" },
                { "id": "statin", "rationale": "ai" }
            ]
        });

        assert_eq!(
            merge(fallback, ai),
            json!({
                "recommendations": [
                    { "id": "monitor", "rationale": "fallback" },
                    { "id": "refer", "rationale": "ai" },
                    { "id": "statin", "rationale": "ai" }
                ]
            })
        );
    }

    #[test]
    fn test_every_array_field_is_unioned() {
        let fallback = json!({ "a": [{ "id": 1 }], "b": ["x"] });
        let ai = json!({ "a": [{ "id": 2 }], "b": ["x", "y"] });
        assert_eq!(
            merge(fallback, ai),
            json!({ "a": [{ "id": 1 }, { "id": 2 }], "b": ["x", "y"] })
        );
    }

    #[test]
    fn test_top_level_arrays_and_scalars() {
        assert_eq!(
            merge(json!([{ "id": "a", "v": 1 }]), json!([{ "id": "a", "v": 2 }])),
            json!([{ "id": "a", "v": 2 }])
        );
        assert_eq!(merge(json!(1), json!("two")), json!("two"));
        assert_eq!(merge(json!({ "k": 1 }), Value::Null), json!({ "k": 1 }));
        assert_eq!(merge(json!({ "k": [1] }), json!({ "k": 2 })), json!({ "k": 2 }));
    }
}
