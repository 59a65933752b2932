//! Protocol eligibility criteria.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ops::{compare, resolve_path, ComparisonOp};

fn required_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityCriterion {
    /// Dotted path into the patient document.
    pub field: String,
    pub operator: ComparisonOp,
    pub value: Value,
    /// Advisory criteria are evaluated and reported but never block eligibility.
    #[serde(default = "required_by_default")]
    pub required: bool,
}

impl EligibilityCriterion {
    pub fn is_met(&self, document: &Value) -> bool {
        let actual = resolve_path(document, &self.field);
        compare(self.operator, actual.as_ref(), &self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    pub field: String,
    pub operator: ComparisonOp,
    pub required: bool,
    pub met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub eligible: bool,
    pub results: Vec<CriterionResult>,
}

impl EligibilityReport {
    /// Required criteria that were not met.
    pub fn failed_required(&self) -> impl Iterator<Item = &CriterionResult> {
        self.results.iter().filter(|r| r.required && !r.met)
    }

    pub fn advisory_failures(&self) -> impl Iterator<Item = &CriterionResult> {
        self.results.iter().filter(|r| !r.required && !r.met)
    }
}

/// Evaluate every criterion against `document`. An empty criteria list is eligible.
pub fn evaluate(criteria: &[EligibilityCriterion], document: &Value) -> EligibilityReport {
    let results: Vec<CriterionResult> = criteria
        .iter()
        .map(|c| CriterionResult {
            field: c.field.clone(),
            operator: c.operator,
            required: c.required,
            met: c.is_met(document),
        })
        .collect();

    EligibilityReport {
        eligible: results.iter().all(|r| r.met || !r.required),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn criteria() -> Vec<EligibilityCriterion> {
        serde_json::from_value(json!([
            { "field": "age", "operator": "gte", "value": 18 },
            { "field": "observations.egfr", "operator": "gt", "value": 30 },
            { "field": "sex", "operator": "eq", "value": "female", "required": false }
        ]))
        .unwrap()
    }

    #[test]
    fn test_all_required_met_is_eligible() {
        let doc = json!({ "age": 40, "sex": "male", "observations": { "egfr": 75 } });
        let report = evaluate(&criteria(), &doc);
        assert!(report.eligible);
        assert_eq!(report.advisory_failures().count(), 1);
    }

    #[test]
    fn test_one_failed_required_criterion_blocks() {
        let doc = json!({ "age": 15, "observations": { "egfr": 75 } });
        let report = evaluate(&criteria(), &doc);
        assert!(!report.eligible);
        let failed: Vec<_> = report.failed_required().map(|r| r.field.as_str()).collect();
        assert_eq!(failed, vec!["age"]);
    }

    #[test]
    fn test_missing_field_fails_required_criterion() {
        let doc = json!({ "age": 40 });
        assert!(!evaluate(&criteria(), &doc).eligible);
    }

    #[test]
    fn test_no_criteria_is_eligible() {
        assert!(evaluate(&[], &json!({})).eligible);
    }

    #[test]
    fn test_unknown_operator_fails_to_load() {
        let err = serde_json::from_value::<EligibilityCriterion>(json!({
            "field": "age", "operator": "between", "value": [18, 65]
        }));
        assert!(err.is_err());
    }
}
