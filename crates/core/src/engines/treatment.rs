//! Treatment recommendations.
//!
//! An in-force protocol the patient is eligible for answers deterministically. Otherwise the
//! request goes through the [`FallbackOrchestrator`] with a generic monitoring and referral plan
//! as the safety net. Patient-safety filters run on every result.

use cds_types::ConditionCode;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;

use super::filters::apply_patient_filters;
use super::model::{Priority, Protocol, Recommendation, RecommendationType, TreatmentPlan};
use crate::audit::{AuditDispatcher, UsageRecord};
use crate::config::ProcessingConfig;
use crate::constants::{ALL_FILTERED_REASON, EXPERT_OPINION, PROTOCOL_PROVIDER};
use crate::error::{BoxError, FallbackError};
use crate::orchestrator::{FallbackOrchestrator, ProcessingOutcome};
use crate::patient::PatientContext;
use crate::provider::Prompt;
use crate::rules::eligibility;
use crate::stores::ProtocolStore;

const FEATURE: &str = "treatment";

const SYSTEM_PROMPT: &str = "You are a clinical decision support assistant. Recommend evidence-based \
treatment for the condition given. Respond with a treatmentPlan JSON object: \
{\"recommendations\": [{\"id\", \"type\", \"priority\", \"medicationOrLabOrder\", \"rationale\", \
\"evidenceGrade\", \"contraindications\"}], \"confidence\": 0-1}.";

pub type TreatmentOutcome = ProcessingOutcome<Vec<Recommendation>>;

pub struct TreatmentEngine {
    store: Arc<dyn ProtocolStore>,
    orchestrator: Arc<FallbackOrchestrator>,
    audit: AuditDispatcher,
    config: ProcessingConfig,
}

impl TreatmentEngine {
    pub fn new(
        store: Arc<dyn ProtocolStore>,
        orchestrator: Arc<FallbackOrchestrator>,
        audit: AuditDispatcher,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            audit,
            config,
        }
    }

    /// Recommendations for one condition.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] only if the generic fallback plan fails, which it cannot do for
    /// a well-formed condition code.
    pub async fn get_recommendations(
        &self,
        condition_code: &ConditionCode,
        patient: &PatientContext,
    ) -> Result<TreatmentOutcome, FallbackError> {
        let started = Instant::now();

        if let Some(protocol) = self.eligible_protocol(condition_code, patient).await {
            let recommendations = apply_patient_filters(protocol.recommendations, patient);
            tracing::info!(
                condition = %condition_code,
                protocol = %protocol.id,
                count = recommendations.len(),
                "recommendations from protocol"
            );
            let outcome = ensure_actionable(
                condition_code,
                ProcessingOutcome::deterministic(recommendations),
                patient,
            );
            self.record(PROTOCOL_PROVIDER, &outcome, started);
            return Ok(outcome);
        }

        let prompt = Prompt::new(
            SYSTEM_PROMPT,
            format!("Condition: {condition_code}\n{}", patient.prompt_summary()),
        );
        let fallback_code = condition_code.clone();
        let outcome = self
            .orchestrator
            .process_with_fallback(
                prompt,
                || async move { Ok::<_, BoxError>(generic_plan(&fallback_code)) },
                &self.config,
            )
            .await?
            .map(|plan| apply_patient_filters(plan.recommendations, patient));
        let outcome = ensure_actionable(condition_code, outcome, patient);

        tracing::info!(
            condition = %condition_code,
            method = %outcome.method,
            count = outcome.data.len(),
            "recommendations resolved"
        );
        self.record(self.orchestrator.provider_name(), &outcome, started);
        Ok(outcome)
    }

    /// Recommendations for several conditions, evaluated concurrently. One entry per code, in
    /// input order.
    pub async fn get_recommendations_for_conditions(
        &self,
        codes: &[ConditionCode],
        patient: &PatientContext,
    ) -> Vec<(ConditionCode, Result<TreatmentOutcome, FallbackError>)> {
        let results =
            futures::future::join_all(codes.iter().map(|code| self.get_recommendations(code, patient)))
                .await;
        codes.iter().cloned().zip(results).collect()
    }

    /// The in-force protocol for `code`, if the patient meets all its required criteria.
    async fn eligible_protocol(
        &self,
        code: &ConditionCode,
        patient: &PatientContext,
    ) -> Option<Protocol> {
        let today = Utc::now().date_naive();
        let protocol = match self
            .store
            .find_active_protocol(code, &code.category(), today)
            .await
        {
            Ok(Some(protocol)) => protocol,
            Ok(None) => {
                tracing::debug!(condition = %code, "no active protocol");
                return None;
            }
            Err(e) => {
                tracing::warn!(condition = %code, error = %e, "protocol store failed, treating as no protocol");
                return None;
            }
        };

        let report = eligibility::evaluate(&protocol.eligibility, &patient.to_document());
        for advisory in report.advisory_failures() {
            tracing::info!(
                protocol = %protocol.id,
                field = %advisory.field,
                operator = %advisory.operator,
                "advisory eligibility criterion not met"
            );
        }
        if !report.eligible {
            let failed: Vec<&str> = report.failed_required().map(|r| r.field.as_str()).collect();
            tracing::info!(protocol = %protocol.id, failed = ?failed, "patient not eligible for protocol");
            return None;
        }
        Some(protocol)
    }

    fn record(&self, provider: &str, outcome: &TreatmentOutcome, started: Instant) {
        self.audit.submit(UsageRecord::new(
            FEATURE,
            provider,
            started.elapsed(),
            outcome.method,
        ));
    }
}

/// Replace a result the safety filters emptied with the generic plan, so callers never get a
/// silent empty list.
fn ensure_actionable(
    code: &ConditionCode,
    outcome: TreatmentOutcome,
    patient: &PatientContext,
) -> TreatmentOutcome {
    if !outcome.data.is_empty() {
        return outcome;
    }
    tracing::warn!(
        condition = %code,
        method = %outcome.method,
        "every recommendation was filtered out, using generic plan"
    );
    let generic = apply_patient_filters(generic_plan(code).recommendations, patient);
    let mut replaced = ProcessingOutcome::fallback(generic, ALL_FILTERED_REASON);
    replaced.ai_latency = outcome.ai_latency;
    replaced
}

/// Conservative plan used when neither a protocol nor the AI answer can be used.
fn generic_plan(code: &ConditionCode) -> TreatmentPlan {
    TreatmentPlan {
        recommendations: vec![
            Recommendation {
                id: format!("{code}-monitoring"),
                kind: RecommendationType::Monitoring,
                priority: Priority::Medium,
                medication_or_lab_order: None,
                rationale: format!(
                    "No applicable protocol for {code}; monitor symptoms and clinical status and review at the next contact."
                ),
                evidence_grade: EXPERT_OPINION.to_owned(),
                contraindications: Vec::new(),
            },
            Recommendation {
                id: format!("{code}-referral"),
                kind: RecommendationType::Referral,
                priority: Priority::Medium,
                medication_or_lab_order: None,
                rationale: format!(
                    "Refer for specialist review of {code} to confirm a management plan."
                ),
                evidence_grade: EXPERT_OPINION.to_owned(),
                contraindications: Vec::new(),
            },
        ],
        confidence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::config::TaskKind;
    use crate::error::{ProviderError, ProviderResult, StoreError, StoreResult};
    use crate::orchestrator::{ConfidenceLevel, ProcessingMethod};
    use crate::provider::{AiProvider, OfflineProvider, ProviderRequest};
    use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
    use crate::stores::InMemoryProtocolStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedProvider {
        reply: Value,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AiProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &ProviderRequest) -> ProviderResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ProtocolStore for BrokenStore {
        async fn find_active_protocol(
            &self,
            _exact: &ConditionCode,
            _category: &ConditionCode,
            _as_of: NaiveDate,
        ) -> StoreResult<Option<Protocol>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn htn_protocol() -> Protocol {
        serde_json::from_value(json!({
            "id": "htn-adult",
            "name": "Adult hypertension",
            "conditionCode": "I10",
            "effectiveDate": "2020-01-01",
            "eligibility": [{ "field": "age", "operator": "gte", "value": 18 }],
            "recommendations": [
                {
                    "id": "amlodipine", "type": "medication", "priority": "high",
                    "medicationOrLabOrder": "Amlodipine 5mg", "rationale": "First-line CCB",
                    "evidenceGrade": "A"
                },
                {
                    "id": "ramipril", "type": "medication", "priority": "high",
                    "medicationOrLabOrder": "Ramipril 2.5mg", "rationale": "ACE inhibitor",
                    "evidenceGrade": "A", "contraindications": ["ACE inhibitor allergy"]
                },
                {
                    "id": "bp-monitoring", "type": "monitoring", "priority": "medium",
                    "rationale": "Home BP monitoring", "evidenceGrade": "B"
                }
            ]
        }))
        .unwrap()
    }

    fn patient(age: u32) -> PatientContext {
        serde_json::from_value(json!({
            "patientId": "p-1",
            "age": age,
            "allergies": [{ "allergen": "ACE inhibitor" }]
        }))
        .unwrap()
    }

    fn engine(store: Arc<dyn ProtocolStore>, provider: Arc<dyn AiProvider>) -> TreatmentEngine {
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            provider,
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            RetryPolicy::default().without_jitter(),
        ));
        let (audit, _handle) = AuditDispatcher::spawn(Arc::new(TracingAuditSink), 16);
        TreatmentEngine::new(store, orchestrator, audit, TaskKind::Treatment.preset())
    }

    fn store() -> Arc<dyn ProtocolStore> {
        Arc::new(InMemoryProtocolStore::new(vec![htn_protocol()]).unwrap())
    }

    fn code(s: &str) -> ConditionCode {
        ConditionCode::parse(s).unwrap()
    }

    fn ids(outcome: &TreatmentOutcome) -> Vec<&str> {
        outcome.data.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_eligible_protocol_answers_without_ai() {
        let provider = Arc::new(FixedProvider {
            reply: json!({}),
            calls: AtomicU32::new(0),
        });
        let engine = engine(store(), provider.clone());

        let outcome = engine.get_recommendations(&code("I10"), &patient(45)).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::High);
        assert_eq!(ids(&outcome), vec!["amlodipine", "bp-monitoring"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ineligible_patient_falls_through_to_generic_plan() {
        let engine = engine(store(), Arc::new(OfflineProvider::new("offline")));

        let outcome = engine.get_recommendations(&code("I10"), &patient(15)).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(ids(&outcome), vec!["I10-monitoring", "I10-referral"]);
        assert!(outcome.data.iter().all(|r| r.evidence_grade == EXPERT_OPINION));
        assert_eq!(
            outcome.fallback_reason,
            Some(ProviderError::Rejected("no AI provider endpoint configured".into()).to_string())
        );
    }

    #[tokio::test]
    async fn test_ai_recommendations_are_filtered_for_allergies() {
        let provider = Arc::new(FixedProvider {
            reply: json!({
                "confidence": 0.92,
                "recommendations": [
                    {
                        "id": "lisinopril", "type": "medication", "priority": "high",
                        "medicationOrLabOrder": "Lisinopril", "rationale": "ACE inhibitor",
                        "evidenceGrade": "A", "contraindications": ["ACE inhibitor allergy"]
                    },
                    {
                        "id": "lifestyle", "type": "lifestyle", "priority": "medium",
                        "rationale": "Reduce salt intake", "evidenceGrade": "A"
                    }
                ]
            }),
            calls: AtomicU32::new(0),
        });
        let engine = engine(store(), provider);

        let outcome = engine.get_recommendations(&code("E11.9"), &patient(50)).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Ai);
        assert_eq!(ids(&outcome), vec!["lifestyle"]);
    }

    #[tokio::test]
    async fn test_protocol_emptied_by_allergy_uses_generic_plan() {
        let mut protocol = htn_protocol();
        protocol.recommendations.truncate(1);
        let store = Arc::new(InMemoryProtocolStore::new(vec![protocol]).unwrap());
        let engine = engine(store, Arc::new(OfflineProvider::new("offline")));
        let patient: PatientContext = serde_json::from_value(json!({
            "patientId": "p-2",
            "age": 60,
            "allergies": [{ "allergen": "amlodipine" }]
        }))
        .unwrap();

        let outcome = engine.get_recommendations(&code("I10"), &patient).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(ids(&outcome), vec!["I10-monitoring", "I10-referral"]);
        assert_eq!(outcome.fallback_reason.as_deref(), Some(ALL_FILTERED_REASON));
    }

    #[tokio::test]
    async fn test_ai_answer_emptied_by_allergy_uses_generic_plan() {
        let provider = Arc::new(FixedProvider {
            reply: json!({
                "confidence": 0.95,
                "recommendations": [{
                    "id": "lisinopril", "type": "medication", "priority": "high",
                    "medicationOrLabOrder": "Lisinopril 10mg", "rationale": "ACE inhibitor",
                    "evidenceGrade": "A", "contraindications": ["ACE inhibitor allergy"]
                }]
            }),
            calls: AtomicU32::new(0),
        });
        let engine = engine(store(), provider);

        let outcome = engine.get_recommendations(&code("E11.9"), &patient(50)).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(ids(&outcome), vec!["E11.9-monitoring", "E11.9-referral"]);
        assert_eq!(outcome.fallback_reason.as_deref(), Some(ALL_FILTERED_REASON));
        assert!(outcome.ai_latency.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_is_treated_as_no_protocol() {
        let engine = engine(Arc::new(BrokenStore), Arc::new(OfflineProvider::new("offline")));
        let outcome = engine.get_recommendations(&code("I10"), &patient(45)).await.unwrap();
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(outcome.data.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_conditions_keep_input_order() {
        let engine = engine(store(), Arc::new(OfflineProvider::new("offline")));
        let codes = vec![code("I10"), code("E11"), code("E78")];

        let results = engine
            .get_recommendations_for_conditions(&codes, &patient(45))
            .await;

        assert_eq!(results.len(), 3);
        let returned: Vec<_> = results.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(returned, vec!["I10", "E11", "E78"]);
        assert_eq!(
            results[0].1.as_ref().unwrap().confidence_level,
            ConfidenceLevel::High
        );
        assert_eq!(ids(results[2].1.as_ref().unwrap()), vec!["E78-monitoring", "E78-referral"]);
    }
}
