//! Known drug-drug interactions keyed by unordered drug pair.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engines::model::InteractionSeverity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRule {
    pub drugs: [String; 2],
    pub severity: InteractionSeverity,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct InteractionTable {
    by_pair: HashMap<(String, String), InteractionRule>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a <= b { (a, b) } else { (b, a) }
}

impl InteractionTable {
    /// Index `rules` by pair. A later rule for the same pair replaces an earlier one.
    pub fn new(rules: Vec<InteractionRule>) -> Self {
        let by_pair = rules
            .into_iter()
            .map(|rule| (pair_key(&rule.drugs[0], &rule.drugs[1]), rule))
            .collect();
        Self { by_pair }
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    /// Case-insensitive, order-independent lookup.
    pub fn lookup(&self, a: &str, b: &str) -> Option<&InteractionRule> {
        self.by_pair.get(&pair_key(a, b))
    }
}
