//! Treatment protocol lookup.

use async_trait::async_trait;
use cds_types::ConditionCode;
use chrono::NaiveDate;
use std::collections::HashSet;

use crate::engines::model::Protocol;
use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait ProtocolStore: Send + Sync {
    /// The protocol in force on `as_of` for `exact`, or failing that for `category`.
    ///
    /// A protocol registered for the exact code always wins over one for its category.
    async fn find_active_protocol(
        &self,
        exact: &ConditionCode,
        category: &ConditionCode,
        as_of: NaiveDate,
    ) -> StoreResult<Option<Protocol>>;
}

/// Protocols held in memory, typically loaded from a knowledge file.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProtocolStore {
    protocols: Vec<Protocol>,
}

impl InMemoryProtocolStore {
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] when two protocols share an id.
    pub fn new(protocols: Vec<Protocol>) -> StoreResult<Self> {
        let mut seen = HashSet::new();
        for p in &protocols {
            if !seen.insert(p.id.as_str()) {
                return Err(StoreError::DuplicateId(p.id.clone()));
            }
        }
        Ok(Self { protocols })
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Latest-effective in-force protocol registered for exactly `code`.
    fn in_force_for(&self, code: &ConditionCode, as_of: NaiveDate) -> Option<&Protocol> {
        self.protocols
            .iter()
            .filter(|p| &p.condition_code == code && p.is_in_force(as_of))
            .max_by_key(|p| p.effective_date)
    }
}

#[async_trait]
impl ProtocolStore for InMemoryProtocolStore {
    async fn find_active_protocol(
        &self,
        exact: &ConditionCode,
        category: &ConditionCode,
        as_of: NaiveDate,
    ) -> StoreResult<Option<Protocol>> {
        Ok(self
            .in_force_for(exact, as_of)
            .or_else(|| self.in_force_for(category, as_of))
            .cloned())
    }
}
