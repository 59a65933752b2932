//! Knowledge file loading.
//!
//! One YAML document carries every deterministic table the engines use:
//!
//! ```yaml
//! protocols: [...]
//! symptomRules: [...]
//! interactions: [...]
//! complianceRules: [...]
//! ```
//!
//! Every section is optional. Schema errors name the failing path, e.g.
//! `protocols[0].eligibility[1].operator`.

use serde::Deserialize;
use std::path::Path;

use super::interactions::{InteractionRule, InteractionTable};
use super::protocols::InMemoryProtocolStore;
use super::symptoms::{SymptomRule, SymptomRuleTable};
use crate::engines::model::Protocol;
use crate::error::{StoreError, StoreResult};
use crate::rules::{ComplianceRuleDefinition, ComplianceRuleSet};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct KnowledgeFile {
    #[serde(default)]
    protocols: Vec<Protocol>,
    #[serde(default)]
    symptom_rules: Vec<SymptomRule>,
    #[serde(default)]
    interactions: Vec<InteractionRule>,
    #[serde(default)]
    compliance_rules: Vec<ComplianceRuleDefinition>,
}

/// The loaded, validated tables.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    pub protocols: InMemoryProtocolStore,
    pub symptoms: SymptomRuleTable,
    pub interactions: InteractionTable,
    pub compliance: ComplianceRuleSet,
}

impl KnowledgeBase {
    /// Parse a knowledge document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaMismatch`] when the YAML does not match the expected shape
    /// (including unknown operators), [`StoreError::InvalidRule`] for an unparsable compliance
    /// condition, and [`StoreError::DuplicateId`] for repeated protocol or rule ids.
    pub fn from_yaml_str(yaml_text: &str) -> StoreResult<Self> {
        let file: KnowledgeFile = if yaml_text.trim().is_empty() {
            KnowledgeFile::default()
        } else {
            let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
            serde_path_to_error::deserialize(deserializer).map_err(|err| {
                let path = err.path().to_string();
                let path = if path.is_empty() || path == "." {
                    "<root>".to_owned()
                } else {
                    path
                };
                StoreError::SchemaMismatch {
                    path,
                    reason: err.into_inner().to_string(),
                }
            })?
        };

        let kb = Self {
            protocols: InMemoryProtocolStore::new(file.protocols)?,
            symptoms: SymptomRuleTable::new(file.symptom_rules),
            interactions: InteractionTable::new(file.interactions),
            compliance: ComplianceRuleSet::from_definitions(file.compliance_rules)?,
        };

        tracing::info!(
            protocols = kb.protocols.len(),
            symptom_rules = kb.symptoms.rules().len(),
            interactions = kb.interactions.len(),
            compliance_rules = kb.compliance.len(),
            "knowledge base loaded"
        );
        Ok(kb)
    }

    /// Read and parse a knowledge file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FileRead`] if the file cannot be read, otherwise as
    /// [`KnowledgeBase::from_yaml_str`].
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(StoreError::FileRead)?;
        Self::from_yaml_str(&text)
    }
}
