//! Symptom-based differential diagnosis.

use cds_types::ConditionCode;
use std::sync::Arc;
use tokio::time::Instant;

use super::model::{DiagnosisAssessment, Differential};
use crate::audit::{AuditDispatcher, UsageRecord};
use crate::config::ProcessingConfig;
use crate::constants::UNDIFFERENTIATED_CODE;
use crate::error::{BoxError, FallbackError};
use crate::orchestrator::{FallbackOrchestrator, ProcessingOutcome};
use crate::patient::PatientContext;
use crate::provider::Prompt;
use crate::stores::SymptomRuleTable;

const FEATURE: &str = "diagnosis";

/// Rule-based probabilities stay inside this band so they never read as AI-level certainty.
const MIN_RULE_PROBABILITY: f64 = 0.05;
const MAX_RULE_PROBABILITY: f64 = 0.6;

const SYSTEM_PROMPT: &str = "You are a clinical decision support assistant. Suggest a ranked \
differential diagnosis for the presenting symptoms. Respond with a diagnosisAssessment JSON \
object: {\"differentials\": [{\"id\", \"conditionCode\" (ICD-10), \"name\", \"probability\" 0-1, \
\"rationale\"}], \"redFlags\": [string], \"extractionQuality\": \"complete\"|\"partial\"|\"uncertain\"}.";

pub struct DiagnosisEngine {
    rules: Arc<SymptomRuleTable>,
    orchestrator: Arc<FallbackOrchestrator>,
    audit: AuditDispatcher,
    config: ProcessingConfig,
}

impl DiagnosisEngine {
    pub fn new(
        rules: Arc<SymptomRuleTable>,
        orchestrator: Arc<FallbackOrchestrator>,
        audit: AuditDispatcher,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            rules,
            orchestrator,
            audit,
            config,
        }
    }

    /// Assess presenting `symptoms`. Red flags found in the rule table are always reported,
    /// whichever path produced the differentials.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] if the rule-based differential fails validation.
    pub async fn assess(
        &self,
        symptoms: &[String],
        patient: &PatientContext,
    ) -> Result<ProcessingOutcome<DiagnosisAssessment>, FallbackError> {
        let started = Instant::now();
        let prompt = Prompt::new(
            SYSTEM_PROMPT,
            format!(
                "Presenting symptoms: {}\n{}",
                symptoms.join(", "),
                patient.prompt_summary()
            ),
        );

        let rules = self.rules.clone();
        let owned_symptoms = symptoms.to_vec();
        let mut outcome = self
            .orchestrator
            .process_with_fallback(
                prompt,
                move || async move { rule_based_assessment(&rules, &owned_symptoms) },
                &self.config,
            )
            .await?;

        for flag in self.rules.red_flags(symptoms) {
            let known = outcome
                .data
                .red_flags
                .iter()
                .any(|f| f.eq_ignore_ascii_case(&flag));
            if !known {
                outcome.data.red_flags.push(flag);
            }
        }
        outcome.data.sort_differentials();

        if !outcome.data.red_flags.is_empty() {
            tracing::warn!(red_flags = ?outcome.data.red_flags, "red-flag symptoms present");
        }
        tracing::info!(
            method = %outcome.method,
            differentials = outcome.data.differentials.len(),
            "diagnosis assessed"
        );
        self.audit.submit(UsageRecord::new(
            FEATURE,
            self.orchestrator.provider_name(),
            started.elapsed(),
            outcome.method,
        ));
        Ok(outcome)
    }
}

/// Rank conditions by the share of their indicative symptoms that are present.
fn rule_based_assessment(
    table: &SymptomRuleTable,
    symptoms: &[String],
) -> Result<DiagnosisAssessment, BoxError> {
    let mut differentials: Vec<Differential> = table
        .matches(symptoms)
        .into_iter()
        .map(|m| Differential {
            id: format!("rule-{}", m.rule.condition_code),
            condition_code: m.rule.condition_code.clone(),
            name: m.rule.name.clone(),
            probability: MIN_RULE_PROBABILITY
                + m.share * (MAX_RULE_PROBABILITY - MIN_RULE_PROBABILITY),
            rationale: format!(
                "Matched {} of {} indicative symptoms: {}",
                m.matched.len(),
                m.rule.symptoms.len(),
                m.matched.join(", ")
            ),
        })
        .collect();

    if differentials.is_empty() {
        differentials.push(Differential {
            id: "rule-undifferentiated".to_owned(),
            condition_code: ConditionCode::parse(UNDIFFERENTIATED_CODE)?,
            name: "Undifferentiated illness, clinical review required".to_owned(),
            probability: MIN_RULE_PROBABILITY,
            rationale: "No symptom rule matched the presenting symptoms".to_owned(),
        });
    }

    let mut assessment = DiagnosisAssessment {
        differentials,
        red_flags: table.red_flags(symptoms),
        extraction_quality: None,
    };
    assessment.sort_differentials();
    Ok(assessment)
}
