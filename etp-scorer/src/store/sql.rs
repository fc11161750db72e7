//! SQLite-backed historical store
//!
//! Reads `user_features`. Ids are always bound as parameters, never
//! interpolated into the statement text.

use super::{HistoricalStore, StoreError};
use crate::types::HistoricalFeatures;
use etp_common::config::StoreConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

/// Ids bound per statement (SQLite's default host-parameter limit is 999)
const IDS_PER_QUERY: usize = 500;

#[derive(Clone)]
pub struct SqlHistoricalStore {
    pool: SqlitePool,
}

impl SqlHistoricalStore {
    /// Open a pool on `config.database` and check the features table exists
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = if config.database.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&config.database)
                .map_err(|_| StoreError::Unavailable("invalid store URL".to_string()))?
        } else {
            SqliteConnectOptions::new().filename(&config.database)
        }
        .read_only(config.read_only)
        .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.verify_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool without checks
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn verify_schema(&self) -> Result<(), StoreError> {
        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'user_features'",
        )
        .fetch_one(&self.pool)
        .await?;

        if tables == 0 {
            return Err(StoreError::Unavailable(
                "user_features table not found".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoricalStore for SqlHistoricalStore {
    async fn fetch(&self, user_ids: &[i64]) -> Result<Vec<HistoricalFeatures>, StoreError> {
        let mut rows = Vec::with_capacity(user_ids.len());

        for chunk in user_ids.chunks(IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                r#"
                SELECT user_id,
                       CAST(total_purchases AS REAL) AS total_purchases,
                       CAST(total_amount_spent AS REAL) AS total_amount_spent,
                       CAST(average_order_value AS REAL) AS average_order_value,
                       CAST(days_since_last_purchase AS REAL) AS days_since_last_purchase,
                       CAST(is_returning_customer AS INTEGER) AS is_returning_customer
                FROM user_features
                WHERE user_id IN ({})
                "#,
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }

            for row in query.fetch_all(&self.pool).await? {
                rows.push(HistoricalFeatures {
                    user_id: row.try_get("user_id")?,
                    total_purchases: row.try_get("total_purchases")?,
                    total_amount_spent: row.try_get("total_amount_spent")?,
                    average_order_value: row.try_get("average_order_value")?,
                    days_since_last_purchase: row.try_get("days_since_last_purchase")?,
                    is_returning_customer: row
                        .try_get::<Option<i64>, _>("is_returning_customer")?
                        .map(|v| v != 0),
                });
            }
        }

        debug!(
            requested = user_ids.len(),
            found = rows.len(),
            "Historical features fetched"
        );

        Ok(rows)
    }
}
