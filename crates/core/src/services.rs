//! Explicit wiring of the decision engines.
//!
//! [`DecisionServices`] is built once at startup from a resolved [`CoreConfig`] and a loaded
//! [`KnowledgeBase`], then passed by reference. There is no process-wide registry: the circuit
//! breakers, the orchestrator and the audit task all belong to this value.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audit::{AuditDispatcher, AuditMetricsSnapshot, AuditSink};
use crate::config::{CoreConfig, TaskKind};
use crate::engines::{DiagnosisEngine, InteractionEngine, TreatmentEngine};
use crate::error::ProviderResult;
use crate::orchestrator::FallbackOrchestrator;
use crate::patient::PatientContext;
use crate::provider::{AiProvider, HttpJsonProvider, OfflineProvider};
use crate::resilience::{CircuitBreakerRegistry, CircuitStats, RetryPolicy};
use crate::rules::{ComplianceFinding, ComplianceRuleSet};
use crate::stores::KnowledgeBase;

/// Upper bound for a single HTTP exchange; each task's own timeout is usually shorter.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the AI provider named by `config`: an HTTP provider when an endpoint is configured,
/// otherwise an offline provider that sends every request to its fallback.
///
/// # Errors
///
/// Returns [`crate::error::ProviderError::Rejected`] if the HTTP client cannot be built.
pub fn provider_from_config(config: &CoreConfig) -> ProviderResult<Arc<dyn AiProvider>> {
    match config.provider_url() {
        Some(url) => {
            let provider = HttpJsonProvider::new(
                config.provider_name(),
                url,
                config.provider_api_key().map(str::to_owned),
                HTTP_REQUEST_TIMEOUT,
            )?;
            Ok(Arc::new(provider))
        }
        None => Ok(Arc::new(OfflineProvider::new(config.provider_name()))),
    }
}

pub struct DecisionServices {
    config: Arc<CoreConfig>,
    orchestrator: Arc<FallbackOrchestrator>,
    audit: AuditDispatcher,
    audit_task: JoinHandle<()>,
    compliance: Arc<ComplianceRuleSet>,
    pub treatment: TreatmentEngine,
    pub diagnosis: DiagnosisEngine,
    pub interactions: InteractionEngine,
}

impl DecisionServices {
    /// Wire every engine. Spawns the audit task, so this must run inside a Tokio runtime.
    pub fn new(
        config: Arc<CoreConfig>,
        knowledge: KnowledgeBase,
        provider: Arc<dyn AiProvider>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(*config.breaker()));
        let retry = RetryPolicy::ai_provider(config.retry_base_delay(), config.retry_max_delay());
        let orchestrator = Arc::new(FallbackOrchestrator::new(provider, breakers, retry));
        let (audit, audit_task) = AuditDispatcher::spawn(audit_sink, config.audit_capacity());

        let KnowledgeBase {
            protocols,
            symptoms,
            interactions,
            compliance,
        } = knowledge;

        tracing::info!(provider = orchestrator.provider_name(), "decision services ready");

        Self {
            treatment: TreatmentEngine::new(
                Arc::new(protocols),
                orchestrator.clone(),
                audit.clone(),
                TaskKind::Treatment.preset(),
            ),
            diagnosis: DiagnosisEngine::new(
                Arc::new(symptoms),
                orchestrator.clone(),
                audit.clone(),
                TaskKind::Diagnosis.preset(),
            ),
            interactions: InteractionEngine::new(
                Arc::new(interactions),
                orchestrator.clone(),
                audit.clone(),
                TaskKind::DrugInteraction.preset(),
            ),
            compliance: Arc::new(compliance),
            config,
            orchestrator,
            audit,
            audit_task,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn evaluate_compliance(&self, patient: &PatientContext) -> Vec<ComplianceFinding> {
        self.compliance.evaluate(patient)
    }

    pub fn breaker_stats(&self) -> Vec<(String, CircuitStats)> {
        self.orchestrator.breakers().snapshot()
    }

    pub fn audit_metrics(&self) -> AuditMetricsSnapshot {
        self.audit.metrics()
    }

    /// Stop accepting audit records and wait for the queue to drain.
    pub async fn shutdown(self) -> AuditMetricsSnapshot {
        let DecisionServices {
            audit,
            audit_task,
            treatment,
            diagnosis,
            interactions,
            ..
        } = self;
        drop((treatment, diagnosis, interactions));
        let metrics = audit.shared_metrics();
        drop(audit);

        if let Err(e) = audit_task.await {
            tracing::warn!(error = %e, "audit task ended abnormally");
        }
        metrics.snapshot()
    }
}
