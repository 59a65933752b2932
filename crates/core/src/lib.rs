//! # CDS Core
//!
//! Resilient clinical decision processing.
//!
//! This crate turns clinical questions into structured answers, preferring a configured AI
//! provider and falling back to deterministic knowledge when the provider is slow, failing,
//! or not confident enough:
//! - Circuit breaking and retry with backoff around every provider call
//! - A fallback orchestrator that scores, merges and validates answers
//! - Treatment, diagnosis and drug-interaction engines over loaded knowledge
//! - Eligibility criteria and compliance rules evaluated against a patient document
//! - Best-effort usage auditing on a detached task
//!
//! **No transport concerns**: HTTP servers, authentication and persistence of patient data
//! belong to callers. Everything here is built explicitly through [`DecisionServices`].

pub mod audit;
pub mod config;
pub mod constants;
pub mod engines;
pub mod error;
pub mod orchestrator;
pub mod patient;
pub mod provider;
pub mod resilience;
pub mod rules;
pub mod services;
pub mod stores;

pub use audit::{AuditDispatcher, AuditMetricsSnapshot, AuditSink, TracingAuditSink, UsageRecord};
pub use config::{CoreConfig, ProcessingConfig, TaskKind};
pub use error::{
    AuditError, BoxError, ConfigError, FallbackError, ProviderError, StoreError,
};
pub use orchestrator::{ConfidenceLevel, FallbackOrchestrator, ProcessingMethod, ProcessingOutcome};
pub use patient::PatientContext;
pub use provider::{AiProvider, OfflineProvider, OutputSchema, Prompt};
pub use services::{provider_from_config, DecisionServices};
pub use stores::KnowledgeBase;
