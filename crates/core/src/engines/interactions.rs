//! Drug-drug interaction checks.

use std::sync::Arc;
use tokio::time::Instant;

use super::model::{Interaction, InteractionReport};
use crate::audit::{AuditDispatcher, UsageRecord};
use crate::config::ProcessingConfig;
use crate::constants::RULES_PROVIDER;
use crate::error::{BoxError, FallbackError};
use crate::orchestrator::{FallbackOrchestrator, ProcessingOutcome};
use crate::provider::Prompt;
use crate::stores::InteractionTable;

const FEATURE: &str = "drugInteraction";

const SYSTEM_PROMPT: &str = "You are a clinical pharmacology assistant. Identify clinically \
relevant interactions between the medications listed. Respond with an interactionReport JSON \
object: {\"interactions\": [{\"id\", \"drugs\": [a, b], \"severity\": \
\"minor\"|\"moderate\"|\"major\"|\"contraindicated\", \"description\"}], \"confidence\": 0-1}.";

pub struct InteractionEngine {
    table: Arc<InteractionTable>,
    orchestrator: Arc<FallbackOrchestrator>,
    audit: AuditDispatcher,
    config: ProcessingConfig,
}

impl InteractionEngine {
    pub fn new(
        table: Arc<InteractionTable>,
        orchestrator: Arc<FallbackOrchestrator>,
        audit: AuditDispatcher,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            table,
            orchestrator,
            audit,
            config,
        }
    }

    /// Check `medications` for interactions.
    ///
    /// Fewer than two distinct medications cannot interact and resolves without the AI path.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] if the table-based report fails validation.
    pub async fn check(
        &self,
        medications: &[String],
    ) -> Result<ProcessingOutcome<InteractionReport>, FallbackError> {
        let started = Instant::now();
        let medications = distinct(medications);

        if medications.len() < 2 {
            let outcome = ProcessingOutcome::deterministic(InteractionReport::default());
            self.record(RULES_PROVIDER, &outcome, started);
            return Ok(outcome);
        }

        let prompt = Prompt::new(
            SYSTEM_PROMPT,
            format!("Medications: {}", medications.join(", ")),
        );
        let table = self.table.clone();
        let meds = medications.clone();
        let mut outcome = self
            .orchestrator
            .process_with_fallback(
                prompt,
                move || async move { Ok::<_, BoxError>(table_report(&table, &meds)) },
                &self.config,
            )
            .await?;
        outcome.data.sort_by_severity();

        tracing::info!(
            method = %outcome.method,
            medications = medications.len(),
            interactions = outcome.data.interactions.len(),
            "interaction check complete"
        );
        self.record(self.orchestrator.provider_name(), &outcome, started);
        Ok(outcome)
    }

    fn record(&self, provider: &str, outcome: &ProcessingOutcome<InteractionReport>, started: Instant) {
        self.audit.submit(UsageRecord::new(
            FEATURE,
            provider,
            started.elapsed(),
            outcome.method,
        ));
    }
}

/// Trimmed, non-empty names with case-insensitive duplicates removed; first spelling wins.
fn distinct(medications: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in medications.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
            out.push(name.to_owned());
        }
    }
    out
}

/// Look up every unordered pair in the table.
fn table_report(table: &InteractionTable, medications: &[String]) -> InteractionReport {
    let mut interactions = Vec::new();
    for (i, a) in medications.iter().enumerate() {
        for b in &medications[i + 1..] {
            if let Some(rule) = table.lookup(a, b) {
                interactions.push(Interaction {
                    id: format!("ddi-{}-{}", a.to_lowercase(), b.to_lowercase()),
                    drugs: [a.clone(), b.clone()],
                    severity: rule.severity,
                    description: rule.description.clone(),
                });
            }
        }
    }

    let mut report = InteractionReport {
        interactions,
        confidence: None,
    };
    report.sort_by_severity();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::config::TaskKind;
    use crate::engines::model::InteractionSeverity;
    use crate::error::ProviderResult;
    use crate::orchestrator::{ConfidenceLevel, ProcessingMethod};
    use crate::provider::{AiProvider, OfflineProvider, ProviderRequest};
    use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
    use crate::stores::InteractionRule;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        reply: Value,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AiProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _request: &ProviderRequest) -> ProviderResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn table() -> InteractionTable {
        InteractionTable::new(vec![
            InteractionRule {
                drugs: ["Warfarin".into(), "Aspirin".into()],
                severity: InteractionSeverity::Major,
                description: "Increased bleeding risk".into(),
            },
            InteractionRule {
                drugs: ["Simvastatin".into(), "Clarithromycin".into()],
                severity: InteractionSeverity::Contraindicated,
                description: "Rhabdomyolysis risk".into(),
            },
        ])
    }

    fn engine(provider: Arc<dyn AiProvider>) -> InteractionEngine {
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            provider,
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            RetryPolicy::default().without_jitter(),
        ));
        let (audit, _handle) = AuditDispatcher::spawn(Arc::new(TracingAuditSink), 16);
        InteractionEngine::new(
            Arc::new(table()),
            orchestrator,
            audit,
            TaskKind::DrugInteraction.preset(),
        )
    }

    fn meds(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_every_pair_is_looked_up() {
        let report = table_report(
            &table(),
            &meds(&["aspirin", "Simvastatin", "warfarin", "clarithromycin"]),
        );
        let severities: Vec<_> = report.interactions.iter().map(|i| i.severity).collect();
        assert_eq!(
            severities,
            vec![InteractionSeverity::Contraindicated, InteractionSeverity::Major]
        );
        assert_eq!(report.interactions[1].drugs, ["aspirin".to_string(), "warfarin".to_string()]);
    }

    #[tokio::test]
    async fn test_single_medication_skips_ai() {
        let provider = Arc::new(CountingProvider {
            reply: json!({}),
            calls: AtomicU32::new(0),
        });
        let engine = engine(provider.clone());

        let outcome = engine.check(&meds(&["Warfarin", " warfarin "])).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::High);
        assert!(outcome.data.interactions.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_ai_is_replaced_not_merged() {
        let provider = Arc::new(CountingProvider {
            reply: json!({ "interactions": [], "confidence": 0.6 }),
            calls: AtomicU32::new(0),
        });
        let engine = engine(provider);

        let outcome = engine.check(&meds(&["Warfarin", "Aspirin"])).await.unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.data.interactions.len(), 1);
        assert_eq!(outcome.data.interactions[0].severity, InteractionSeverity::Major);
    }

    #[tokio::test]
    async fn test_offline_provider_uses_table() {
        let engine = engine(Arc::new(OfflineProvider::new("offline")));
        let outcome = engine
            .check(&meds(&["Clarithromycin", "simvastatin"]))
            .await
            .unwrap();
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(outcome.data.interactions[0].id, "ddi-clarithromycin-simvastatin");
    }
}
