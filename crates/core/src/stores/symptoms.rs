//! Symptom rule table used by the rule-based differential.

use cds_types::ConditionCode;
use serde::{Deserialize, Serialize};

/// Conditions indicated by a set of symptoms, plus symptoms that demand urgent review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomRule {
    pub condition_code: ConditionCode,
    pub name: String,
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

/// A rule whose indicative symptoms were at least partly present.
#[derive(Debug, Clone, PartialEq)]
pub struct SymptomMatch<'a> {
    pub rule: &'a SymptomRule,
    pub matched: Vec<&'a str>,
    /// Matched symptoms over the rule's indicative symptoms, in `(0, 1]`.
    pub share: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymptomRuleTable {
    rules: Vec<SymptomRule>,
}

fn normalise(s: &str) -> String {
    s.trim().to_lowercase()
}

impl SymptomRuleTable {
    pub fn new(rules: Vec<SymptomRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[SymptomRule] {
        &self.rules
    }

    /// Rules with at least one matching symptom, in table order. Matching is case-insensitive
    /// on whole symptom names.
    pub fn matches<'a>(&'a self, symptoms: &[String]) -> Vec<SymptomMatch<'a>> {
        let presented: Vec<String> = symptoms.iter().map(|s| normalise(s)).collect();

        self.rules
            .iter()
            .filter(|rule| !rule.symptoms.is_empty())
            .filter_map(|rule| {
                let matched: Vec<&str> = rule
                    .symptoms
                    .iter()
                    .filter(|s| presented.contains(&normalise(s)))
                    .map(String::as_str)
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                let share = matched.len() as f64 / rule.symptoms.len() as f64;
                Some(SymptomMatch {
                    rule,
                    matched,
                    share,
                })
            })
            .collect()
    }

    /// Red-flag symptoms from any rule that appear in `symptoms`, deduplicated, in the order the
    /// patient reported them.
    pub fn red_flags(&self, symptoms: &[String]) -> Vec<String> {
        let mut flags: Vec<String> = Vec::new();
        for symptom in symptoms {
            let wanted = normalise(symptom);
            let is_flag = self
                .rules
                .iter()
                .flat_map(|r| &r.red_flags)
                .any(|f| normalise(f) == wanted);
            if is_flag && !flags.iter().any(|f| normalise(f) == wanted) {
                flags.push(symptom.trim().to_owned());
            }
        }
        flags
    }
}
