//! Deterministic knowledge the engines consult: protocols, symptom rules and interactions.

pub mod interactions;
pub mod knowledge;
pub mod protocols;
pub mod symptoms;

pub use interactions::{InteractionRule, InteractionTable};
pub use knowledge::KnowledgeBase;
pub use protocols::{InMemoryProtocolStore, ProtocolStore};
pub use symptoms::{SymptomMatch, SymptomRule, SymptomRuleTable};
