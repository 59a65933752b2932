//! Patient context supplied to the decision engines.
//!
//! Engines never read the record store themselves; callers assemble a [`PatientContext`] and
//! pass it in. Eligibility criteria and compliance rules address it through dotted paths over
//! its JSON form (see [`PatientContext::to_document`]), e.g. `age`, `observations.egfr` or
//! `diagnoses.code`.

use cds_types::ConditionCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allergy {
    pub allergen: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationEntry {
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisEntry {
    pub code: ConditionCode,
    #[serde(default)]
    pub description: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default)]
    pub allergies: Vec<Allergy>,
    #[serde(default)]
    pub medications: Vec<MedicationEntry>,
    #[serde(default)]
    pub diagnoses: Vec<DiagnosisEntry>,
    #[serde(default)]
    pub observations: Map<String, Value>,
}

impl PatientContext {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }

    pub fn active_allergies(&self) -> impl Iterator<Item = &Allergy> {
        self.allergies.iter().filter(|a| a.active)
    }

    pub fn active_medications(&self) -> impl Iterator<Item = &MedicationEntry> {
        self.medications.iter().filter(|m| m.active)
    }

    pub fn active_diagnoses(&self) -> impl Iterator<Item = &DiagnosisEntry> {
        self.diagnoses.iter().filter(|d| d.active)
    }

    /// JSON form used for path resolution. Inactive entries are left out so rules only ever see
    /// the patient's current state.
    pub fn to_document(&self) -> Value {
        let current = PatientContext {
            patient_id: self.patient_id.clone(),
            age: self.age,
            sex: self.sex.clone(),
            allergies: self.active_allergies().cloned().collect(),
            medications: self.active_medications().cloned().collect(),
            diagnoses: self.active_diagnoses().cloned().collect(),
            observations: self.observations.clone(),
        };
        serde_json::to_value(current).unwrap_or_default()
    }

    /// Plain-text summary handed to AI providers. Identifiers are not included.
    pub fn prompt_summary(&self) -> String {
        let mut lines = Vec::new();

        let demographics = match (self.age, self.sex.as_deref()) {
            (Some(age), Some(sex)) => format!("{age}-year-old {sex}"),
            (Some(age), None) => format!("{age}-year-old patient"),
            (None, Some(sex)) => format!("{sex} patient, age unknown"),
            (None, None) => "patient, age and sex unknown".to_owned(),
        };
        lines.push(format!("Patient: {demographics}"));

        let diagnoses: Vec<_> = self
            .active_diagnoses()
            .map(|d| {
                if d.description.is_empty() {
                    d.code.to_string()
                } else {
                    format!("{} ({})", d.code, d.description)
                }
            })
            .collect();
        lines.push(format!("Active diagnoses: {}", list_or_none(&diagnoses)));

        let medications: Vec<_> = self.active_medications().map(|m| m.name.clone()).collect();
        lines.push(format!("Active medications: {}", list_or_none(&medications)));

        let allergies: Vec<_> = self.active_allergies().map(|a| a.allergen.clone()).collect();
        lines.push(format!("Allergies: {}", list_or_none(&allergies)));

        if !self.observations.is_empty() {
            let observations: Vec<_> = self
                .observations
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            lines.push(format!("Observations: {}", observations.join(", ")));
        }

        lines.join("\n")
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none recorded".to_owned()
    } else {
        items.join(", ")
    }
}
