//! Clinical output types produced by the engines.
//!
//! Every type an AI provider may be asked for implements [`OutputSchema`], so the same
//! validation guards AI answers, hybrid merges and deterministic fallbacks.

use cds_types::ConditionCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::provider::OutputSchema;
use crate::rules::EligibilityCriterion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Medication,
    Lab,
    Monitoring,
    Referral,
    Lifestyle,
    Procedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication_or_lab_order: Option<String>,
    pub rationale: String,
    pub evidence_grade: String,
    #[serde(default)]
    pub contraindications: Vec<String>,
}

impl Recommendation {
    pub fn is_medication(&self) -> bool {
        self.kind == RecommendationType::Medication
    }
}

impl OutputSchema for Recommendation {
    const SCHEMA_NAME: &'static str = "recommendation";

    fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("recommendation id cannot be empty".into());
        }
        if self.rationale.trim().is_empty() {
            return Err(format!("recommendation '{}' has no rationale", self.id));
        }
        if self.is_medication()
            && self
                .medication_or_lab_order
                .as_deref()
                .is_none_or(|m| m.trim().is_empty())
        {
            return Err(format!(
                "medication recommendation '{}' does not name a medication",
                self.id
            ));
        }
        Ok(())
    }
}

/// Shape requested from AI providers for treatment recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentPlan {
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl OutputSchema for TreatmentPlan {
    const SCHEMA_NAME: &'static str = "treatmentPlan";

    fn validate(&self) -> Result<(), String> {
        if self.recommendations.is_empty() {
            return Err("treatment plan has no recommendations".into());
        }
        self.recommendations.iter().try_for_each(OutputSchema::validate)
    }
}

/// A treatment protocol owned by the protocol store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub id: String,
    pub name: String,
    pub condition_code: ConditionCode,
    #[serde(default)]
    pub eligibility: Vec<EligibilityCriterion>,
    pub recommendations: Vec<Recommendation>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub effective_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
}

fn default_active() -> bool {
    true
}

impl Protocol {
    /// Active, already effective on `as_of`, and not yet expired. The expiration date itself is
    /// the first day the protocol no longer applies.
    pub fn is_in_force(&self, as_of: NaiveDate) -> bool {
        self.is_active
            && self.effective_date <= as_of
            && self.expiration_date.is_none_or(|end| as_of < end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Differential {
    pub id: String,
    pub condition_code: ConditionCode,
    pub name: String,
    pub probability: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisAssessment {
    pub differentials: Vec<Differential>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_quality: Option<String>,
}

impl DiagnosisAssessment {
    /// Sort differentials by probability, highest first. Ties keep their order.
    pub fn sort_differentials(&mut self) {
        self.differentials
            .sort_by(|a, b| b.probability.total_cmp(&a.probability));
    }
}

impl OutputSchema for DiagnosisAssessment {
    const SCHEMA_NAME: &'static str = "diagnosisAssessment";

    fn validate(&self) -> Result<(), String> {
        if self.differentials.is_empty() {
            return Err("assessment has no differentials".into());
        }
        for d in &self.differentials {
            if !(0.0..=1.0).contains(&d.probability) {
                return Err(format!(
                    "differential '{}' probability {} is outside [0, 1]",
                    d.id, d.probability
                ));
            }
            if d.name.trim().is_empty() {
                return Err(format!("differential '{}' has no name", d.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionSeverity {
    Minor,
    Moderate,
    Major,
    Contraindicated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub drugs: [String; 2],
    pub severity: InteractionSeverity,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionReport {
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl InteractionReport {
    /// Most severe first.
    pub fn sort_by_severity(&mut self) {
        self.interactions.sort_by(|a, b| b.severity.cmp(&a.severity));
    }
}

impl OutputSchema for InteractionReport {
    const SCHEMA_NAME: &'static str = "interactionReport";

    fn validate(&self) -> Result<(), String> {
        for i in &self.interactions {
            if i.drugs.iter().any(|d| d.trim().is_empty()) {
                return Err(format!("interaction '{}' names an empty drug", i.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn protocol(effective: &str, expires: Option<&str>) -> Protocol {
        serde_json::from_value(json!({
            "id": "htn-1",
            "name": "Hypertension step 1",
            "conditionCode": "I10",
            "recommendations": [],
            "effectiveDate": effective,
            "expirationDate": expires,
        }))
        .unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_protocol_in_force_window() {
        let p = protocol("2024-01-01", Some("2025-01-01"));
        assert!(!p.is_in_force(date("2023-12-31")));
        assert!(p.is_in_force(date("2024-01-01")));
        assert!(p.is_in_force(date("2024-12-31")));
        assert!(!p.is_in_force(date("2025-01-01")));

        let open_ended = protocol("2024-01-01", None);
        assert!(open_ended.is_in_force(date("2030-06-01")));

        let mut inactive = open_ended;
        inactive.is_active = false;
        assert!(!inactive.is_in_force(date("2030-06-01")));
    }

    #[test]
    fn test_recommendation_wire_format() {
        let rec: Recommendation = serde_json::from_value(json!({
            "id": "amlodipine",
            "type": "medication",
            "priority": "high",
            "medicationOrLabOrder": "Amlodipine 5mg OD",
            "rationale": "First-line calcium channel blocker",
            "evidenceGrade": "A"
        }))
        .unwrap();
        assert!(rec.is_medication());
        assert!(rec.contraindications.is_empty());
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_medication_without_order_is_invalid() {
        let rec = Recommendation {
            id: "x".into(),
            kind: RecommendationType::Medication,
            priority: Priority::Medium,
            medication_or_lab_order: None,
            rationale: "because".into(),
            evidence_grade: "B".into(),
            contraindications: vec![],
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_assessment_rejects_out_of_range_probability() {
        let assessment: DiagnosisAssessment = serde_json::from_value(json!({
            "differentials": [
                { "id": "d1", "conditionCode": "J18.9", "name": "Pneumonia", "probability": 1.4, "rationale": "" }
            ]
        }))
        .unwrap();
        assert!(assessment.validate().unwrap_err().contains("outside [0, 1]"));
    }

    #[test]
    fn test_interactions_sort_most_severe_first() {
        let mut report = InteractionReport::default();
        for (id, severity) in [
            ("a", InteractionSeverity::Minor),
            ("b", InteractionSeverity::Contraindicated),
            ("c", InteractionSeverity::Moderate),
        ] {
            report.interactions.push(Interaction {
                id: id.into(),
                drugs: ["x".into(), "y".into()],
                severity,
                description: String::new(),
            });
        }
        report.sort_by_severity();
        let ids: Vec<_> = report.interactions.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
