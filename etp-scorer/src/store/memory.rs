//! In-process historical store
//!
//! Holds a fixed set of rows. Used by tests and local runs alongside
//! [`MemorySource`](crate::stream::MemorySource).

use super::{HistoricalStore, StoreError};
use crate::types::HistoricalFeatures;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Vec<HistoricalFeatures>,
}

impl MemoryStore {
    pub fn new(rows: Vec<HistoricalFeatures>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait::async_trait]
impl HistoricalStore for MemoryStore {
    async fn fetch(&self, user_ids: &[i64]) -> Result<Vec<HistoricalFeatures>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| user_ids.contains(&r.user_id))
            .cloned()
            .collect())
    }
}
