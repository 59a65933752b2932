//! Compliance rules stored as data.
//!
//! Each rule carries its condition as text. The whole set is parsed when it is loaded, so a
//! malformed rule is rejected up front and evaluation never parses.

use serde::{Deserialize, Serialize};

use super::expr::RuleExpr;
use crate::error::{StoreError, StoreResult};
use crate::patient::PatientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Info,
    Warning,
    Critical,
}

/// A rule as written in a knowledge file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRuleDefinition {
    pub id: String,
    pub message: String,
    pub severity: RuleSeverity,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceRule {
    pub id: String,
    pub message: String,
    pub severity: RuleSeverity,
    pub condition: RuleExpr,
}

impl TryFrom<ComplianceRuleDefinition> for ComplianceRule {
    type Error = StoreError;

    fn try_from(def: ComplianceRuleDefinition) -> Result<Self, Self::Error> {
        let condition = RuleExpr::parse(&def.condition).map_err(|source| StoreError::InvalidRule {
            rule_id: def.id.clone(),
            source,
        })?;
        Ok(Self {
            id: def.id,
            message: def.message,
            severity: def.severity,
            condition,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceFinding {
    pub rule_id: String,
    pub message: String,
    pub severity: RuleSeverity,
    pub triggered: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplianceRuleSet {
    rules: Vec<ComplianceRule>,
}

impl ComplianceRuleSet {
    /// Parse every definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRule`] for the first rule whose condition does not parse,
    /// or [`StoreError::DuplicateId`] when two rules share an id.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ComplianceRuleDefinition>,
    ) -> StoreResult<Self> {
        let mut rules: Vec<ComplianceRule> = Vec::new();
        for def in definitions {
            if rules.iter().any(|r| r.id == def.id) {
                return Err(StoreError::DuplicateId(def.id));
            }
            rules.push(def.try_into()?);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ComplianceRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// One finding per rule, in rule order.
    pub fn evaluate(&self, patient: &PatientContext) -> Vec<ComplianceFinding> {
        let document = patient.to_document();
        self.rules
            .iter()
            .map(|rule| {
                let triggered = rule.condition.evaluate(&document);
                if triggered {
                    tracing::debug!(rule_id = %rule.id, severity = ?rule.severity, "compliance rule triggered");
                }
                ComplianceFinding {
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                    severity: rule.severity,
                    triggered,
                }
            })
            .collect()
    }
}
