//! Clinical decision engines.
//!
//! Each engine owns its deterministic knowledge, builds the prompt for its task and hands the
//! AI path to a shared [`FallbackOrchestrator`](crate::orchestrator::FallbackOrchestrator).

pub mod diagnosis;
pub mod filters;
pub mod interactions;
pub mod model;
pub mod treatment;

pub use diagnosis::DiagnosisEngine;
pub use filters::apply_patient_filters;
pub use interactions::InteractionEngine;
pub use model::{
    DiagnosisAssessment, Differential, Interaction, InteractionReport, InteractionSeverity,
    Priority, Protocol, Recommendation, RecommendationType, TreatmentPlan,
};
pub use treatment::{TreatmentEngine, TreatmentOutcome};
