//! Confidence scoring of raw AI output.
//!
//! Providers express certainty in different shapes. The first signal found wins:
//! 1. a top-level `probability`
//! 2. the highest `differentials[].probability`
//! 3. `extractionQuality` mapped to a score
//! 4. a top-level `confidence`
//! 5. [`DEFAULT_CONFIDENCE`]
//!
//! Every score is clamped into `[0, 1]`; non-numeric or non-finite values are ignored.

use serde_json::Value;

use crate::constants::{
    DEFAULT_CONFIDENCE, EXTRACTION_COMPLETE, EXTRACTION_PARTIAL, EXTRACTION_UNCERTAIN,
};

pub fn extract_confidence(raw: &Value) -> f64 {
    explicit_number(raw, "probability")
        .or_else(|| max_differential(raw))
        .or_else(|| extraction_quality(raw))
        .or_else(|| explicit_number(raw, "confidence"))
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0)
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn explicit_number(raw: &Value, key: &str) -> Option<f64> {
    raw.get(key).and_then(finite)
}

fn max_differential(raw: &Value) -> Option<f64> {
    raw.get("differentials")?
        .as_array()?
        .iter()
        .filter_map(|d| d.get("probability").and_then(finite))
        .reduce(f64::max)
}

fn extraction_quality(raw: &Value) -> Option<f64> {
    match raw.get("extractionQuality")?.as_str()? {
        "complete" => Some(EXTRACTION_COMPLETE),
        "partial" => Some(EXTRACTION_PARTIAL),
        "uncertain" => Some(EXTRACTION_UNCERTAIN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_probability_takes_precedence() {
        let raw = json!({
            "probability": 0.4,
            "differentials": [{ "probability": 0.95 }],
            "confidence": 0.99
        });
        assert_eq!(extract_confidence(&raw), 0.4);
    }

    #[test]
    fn test_max_differential_probability() {
        let raw = json!({
            "differentials": [
                { "probability": 0.3 },
                { "probability": 0.82 },
                { "name": "no score" }
            ],
            "confidence": 0.1
        });
        assert_eq!(extract_confidence(&raw), 0.82);
    }

    #[test]
    fn test_empty_differentials_fall_through() {
        let raw = json!({ "differentials": [], "extractionQuality": "partial" });
        assert_eq!(extract_confidence(&raw), 0.7);
    }

    #[test]
    fn test_extraction_quality_mapping() {
        assert_eq!(extract_confidence(&json!({ "extractionQuality": "complete" })), 0.9);
        assert_eq!(extract_confidence(&json!({ "extractionQuality": "uncertain" })), 0.3);
        assert_eq!(
            extract_confidence(&json!({ "extractionQuality": "great", "confidence": 0.6 })),
            0.6
        );
    }

    #[test]
    fn test_default_and_clamping() {
        assert_eq!(extract_confidence(&json!({ "items": [] })), 0.5);
        assert_eq!(extract_confidence(&json!([1, 2, 3])), 0.5);
        assert_eq!(extract_confidence(&json!({ "confidence": "high" })), 0.5);
        assert_eq!(extract_confidence(&json!({ "confidence": 7 })), 1.0);
        assert_eq!(extract_confidence(&json!({ "probability": -2 })), 0.0);
    }
}
