//! Historical feature store access

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SqlHistoricalStore;

use crate::types::HistoricalFeatures;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Historical store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Historical store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of stored per-user features
#[async_trait::async_trait]
pub trait HistoricalStore: Send + Sync {
    /// Rows for the given ids; ids with no stored row are simply absent
    async fn fetch(&self, user_ids: &[i64]) -> Result<Vec<HistoricalFeatures>, StoreError>;
}
