//! Row types flowing through the ETP pipeline
//!
//! - [`StreamRecord`]: one parsed stream event
//! - [`HistoricalFeatures`]: one stored per-user row
//! - [`JoinedBatch`] / [`JoinedRow`]: inner join of the two on `user_id`
//! - [`CleanedTable`] / [`CleanedRow`]: imputed, derived, model-ready rows
//! - [`PredictionResult`]: scores plus the users that could not be scored

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Fields every stream message must carry
pub const REAL_TIME_FIELDS: [&str; 7] = [
    "user_id",
    "last_page_1",
    "last_page_2",
    "last_page_3",
    "time_spent_1",
    "time_spent_2",
    "time_spent_3",
];

/// Columns read from the historical store
pub const HISTORICAL_FIELDS: [&str; 6] = [
    "user_id",
    "total_purchases",
    "total_amount_spent",
    "average_order_value",
    "days_since_last_purchase",
    "is_returning_customer",
];

/// Model input columns, in the order [`CleanedRow::to_vector`] emits them
pub const FEATURE_COLUMNS: [&str; 13] = [
    "last_page_1",
    "last_page_2",
    "last_page_3",
    "time_spent_1",
    "time_spent_2",
    "time_spent_3",
    "total_purchases",
    "total_amount_spent",
    "average_order_value",
    "days_since_last_purchase",
    "is_returning_customer",
    "total_time_spent",
    "avg_time_spent",
];

/// Page identifier as sent by the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageId {
    Numeric(i64),
    /// Label such as `"checkout"`; the model has no encoding for it
    Categorical(String),
}

impl From<i64> for PageId {
    fn from(id: i64) -> Self {
        PageId::Numeric(id)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageId::Numeric(id) => write!(f, "{}", id),
            PageId::Categorical(label) => write!(f, "{:?}", label),
        }
    }
}

/// One real-time event
///
/// `None` marks a value that was present as a key but null.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub user_id: i64,
    pub last_page: [Option<PageId>; 3],
    /// Seconds; negative means unknown
    pub time_spent: [Option<f64>; 3],
}

/// Stored per-user features
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalFeatures {
    pub user_id: i64,
    pub total_purchases: Option<f64>,
    pub total_amount_spent: Option<f64>,
    pub average_order_value: Option<f64>,
    pub days_since_last_purchase: Option<f64>,
    pub is_returning_customer: Option<bool>,
}

impl HistoricalFeatures {
    /// Row with every feature present
    pub fn complete(
        user_id: i64,
        total_purchases: f64,
        total_amount_spent: f64,
        average_order_value: f64,
        days_since_last_purchase: f64,
        is_returning_customer: bool,
    ) -> Self {
        Self {
            user_id,
            total_purchases: Some(total_purchases),
            total_amount_spent: Some(total_amount_spent),
            average_order_value: Some(average_order_value),
            days_since_last_purchase: Some(days_since_last_purchase),
            is_returning_customer: Some(is_returning_customer),
        }
    }
}

/// Stream record joined with its historical row
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub user_id: i64,
    pub last_page: [Option<PageId>; 3],
    pub time_spent: [Option<f64>; 3],
    pub total_purchases: Option<f64>,
    pub total_amount_spent: Option<f64>,
    pub average_order_value: Option<f64>,
    pub days_since_last_purchase: Option<f64>,
    pub is_returning_customer: Option<bool>,
}

impl JoinedRow {
    pub fn new(record: StreamRecord, history: HistoricalFeatures) -> Self {
        debug_assert_eq!(record.user_id, history.user_id);
        Self {
            user_id: record.user_id,
            last_page: record.last_page,
            time_spent: record.time_spent,
            total_purchases: history.total_purchases,
            total_amount_spent: history.total_amount_spent,
            average_order_value: history.average_order_value,
            days_since_last_purchase: history.days_since_last_purchase,
            is_returning_customer: history.is_returning_customer,
        }
    }
}

/// Joined table: rows plus the column set the producer supplied
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedBatch {
    columns: Vec<String>,
    rows: Vec<JoinedRow>,
}

impl JoinedBatch {
    /// Batch carrying every stream and historical column
    pub fn new(rows: Vec<JoinedRow>) -> Self {
        let columns = REAL_TIME_FIELDS
            .iter()
            .chain(HISTORICAL_FIELDS.iter().skip(1))
            .map(|c| c.to_string())
            .collect();
        Self { columns, rows }
    }

    /// Batch with an explicit column set, for producers with a partial schema
    pub fn with_columns(columns: Vec<String>, rows: Vec<JoinedRow>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[JoinedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<JoinedRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.user_id).collect()
    }
}

/// Model-ready feature row; no missing values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedRow {
    pub last_page_1: f64,
    pub last_page_2: f64,
    pub last_page_3: f64,
    /// Minutes
    pub time_spent_1: f64,
    pub time_spent_2: f64,
    pub time_spent_3: f64,
    pub total_purchases: f64,
    pub total_amount_spent: f64,
    pub average_order_value: f64,
    pub days_since_last_purchase: f64,
    /// 1 or 0
    pub is_returning_customer: u8,
    pub total_time_spent: f64,
    pub avg_time_spent: f64,
}

impl CleanedRow {
    /// Feature values in [`FEATURE_COLUMNS`] order
    pub fn to_vector(&self) -> [f64; 13] {
        [
            self.last_page_1,
            self.last_page_2,
            self.last_page_3,
            self.time_spent_1,
            self.time_spent_2,
            self.time_spent_3,
            self.total_purchases,
            self.total_amount_spent,
            self.average_order_value,
            self.days_since_last_purchase,
            f64::from(self.is_returning_customer),
            self.total_time_spent,
            self.avg_time_spent,
        ]
    }
}

/// A cleaned row paired with the user it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRow {
    pub user_id: i64,
    pub features: CleanedRow,
}

/// Cleaned rows in input order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanedTable {
    rows: Vec<ScoringRow>,
}

impl CleanedTable {
    pub fn new(rows: Vec<ScoringRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ScoringRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Surviving user ids, aligned row-for-row with [`Self::features`]
    pub fn user_ids(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.user_id).collect()
    }

    pub fn features(&self) -> Vec<CleanedRow> {
        self.rows.iter().map(|r| r.features.clone()).collect()
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PredictionResult {
    pub predictions: BTreeMap<i64, f64>,
    /// Joined rows removed for unrecoverable missing data
    pub dropped_user_ids: BTreeSet<i64>,
    /// Batch users with no historical row
    pub unmatched_user_ids: BTreeSet<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_batch_default_columns_cover_all_fields() {
        let batch = JoinedBatch::new(vec![]);
        for field in REAL_TIME_FIELDS.iter().chain(HISTORICAL_FIELDS.iter()) {
            assert!(batch.has_column(field), "missing column {}", field);
        }
        // user_id appears once
        assert_eq!(batch.columns().len(), 12);
    }

    #[test]
    fn test_cleaned_row_vector_order_matches_columns() {
        let row = CleanedRow {
            last_page_1: 1.0,
            last_page_2: 2.0,
            last_page_3: 3.0,
            time_spent_1: 4.0,
            time_spent_2: 5.0,
            time_spent_3: 6.0,
            total_purchases: 7.0,
            total_amount_spent: 8.0,
            average_order_value: 9.0,
            days_since_last_purchase: 10.0,
            is_returning_customer: 1,
            total_time_spent: 15.0,
            avg_time_spent: 5.0,
        };
        let v = row.to_vector();
        assert_eq!(v.len(), FEATURE_COLUMNS.len());
        assert_eq!(v[FEATURE_COLUMNS.iter().position(|c| *c == "days_since_last_purchase").unwrap()], 10.0);
        assert_eq!(v[10], 1.0);
    }
}
