//! Patient-safety filters applied to every recommendation list, whatever produced it.

use super::model::Recommendation;
use crate::patient::PatientContext;

fn normalise(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Drop recommendations that conflict with the patient's allergies, current medications or
/// active diagnoses. Order of the survivors is kept.
pub fn apply_patient_filters(
    recommendations: Vec<Recommendation>,
    patient: &PatientContext,
) -> Vec<Recommendation> {
    let allergens: Vec<String> = patient
        .active_allergies()
        .map(|a| normalise(&a.allergen))
        .filter(|a| !a.is_empty())
        .collect();
    let medications: Vec<String> = patient
        .active_medications()
        .map(|m| normalise(&m.name))
        .collect();

    recommendations
        .into_iter()
        .filter(|rec| {
            let reason = if conflicts_with_allergy(rec, &allergens) {
                Some("allergy")
            } else if duplicates_medication(rec, &medications) {
                Some("duplicate medication")
            } else if contraindicated_by_diagnosis(rec, patient) {
                Some("contraindicated by diagnosis")
            } else {
                None
            };

            if let Some(reason) = reason {
                tracing::info!(recommendation = %rec.id, reason, "recommendation filtered out");
            }
            reason.is_none()
        })
        .collect()
}

fn conflicts_with_allergy(rec: &Recommendation, allergens: &[String]) -> bool {
    if !rec.is_medication() || allergens.is_empty() {
        return false;
    }
    let mut haystacks: Vec<String> = rec.contraindications.iter().map(|c| normalise(c)).collect();
    if let Some(name) = &rec.medication_or_lab_order {
        haystacks.push(normalise(name));
    }
    haystacks
        .iter()
        .any(|h| allergens.iter().any(|allergen| h.contains(allergen.as_str())))
}

/// An order duplicates a current medication when it names it, dose or not: the order contains
/// the medication name, or both start with the same drug word.
fn duplicates_medication(rec: &Recommendation, medications: &[String]) -> bool {
    if !rec.is_medication() {
        return false;
    }
    let Some(order) = rec.medication_or_lab_order.as_deref().map(normalise) else {
        return false;
    };
    let order_drug = order.split_whitespace().next();
    medications
        .iter()
        .filter(|m| !m.is_empty())
        .any(|m| order.contains(m.as_str()) || order_drug == m.split_whitespace().next())
}

fn contraindicated_by_diagnosis(rec: &Recommendation, patient: &PatientContext) -> bool {
    rec.contraindications
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .any(|contra| {
            let lowered = contra.to_lowercase();
            patient.active_diagnoses().any(|d| {
                d.description.to_lowercase().contains(&lowered) || d.code.starts_with(contra)
            })
        })
}
