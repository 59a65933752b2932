//! Data-driven clinical rules: eligibility criteria and compliance conditions share one set of
//! comparison semantics.

pub mod compliance;
pub mod eligibility;
pub mod expr;
pub mod ops;

pub use compliance::{
    ComplianceFinding, ComplianceRule, ComplianceRuleDefinition, ComplianceRuleSet, RuleSeverity,
};
pub use eligibility::{CriterionResult, EligibilityCriterion, EligibilityReport};
pub use expr::{RuleExpr, RuleParseError};
pub use ops::{compare, resolve_path, ComparisonOp};
