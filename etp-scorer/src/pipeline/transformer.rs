//! Feature transformation
//!
//! Turns a joined batch into model-ready rows. Steps, in order:
//!
//! 1. `time_spent_*`: negative or missing → 0
//! 2. `total_purchases`, `total_amount_spent`, `average_order_value`: negative
//!    or missing → 0
//! 3. `days_since_last_purchase`: negative or missing → batch maximum
//! 4. `is_returning_customer`: missing → false
//! 5. Rows still holding a missing value are dropped; a surviving row with a
//!    categorical page fails the batch, since the model cannot encode it
//! 6. `is_returning_customer` → 1/0
//! 7. `time_spent_*` seconds → minutes
//! 8. `total_time_spent`, `avg_time_spent` derived
//! 9. `user_id` carried beside each row
//!
//! Non-finite numbers are treated as missing.

use crate::types::{
    CleanedRow, CleanedTable, JoinedBatch, JoinedRow, PageId, ScoringRow, HISTORICAL_FIELDS,
    REAL_TIME_FIELDS,
};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransformationError {
    #[error("Joined batch is missing required column '{0}'")]
    MissingColumn(String),

    #[error("User {user_id} has categorical {field} {value}, which the model cannot encode")]
    UnencodablePage {
        user_id: i64,
        field: &'static str,
        value: String,
    },
}

impl TransformationError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransformationError::MissingColumn(_) => "missing_column",
            TransformationError::UnencodablePage { .. } => "unencodable_page",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub table: CleanedTable,
    pub dropped_user_ids: BTreeSet<i64>,
}

#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    /// Used for `days_since_last_purchase` when the batch has no present value
    days_fallback: f64,
}

impl Default for FeatureTransformer {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl FeatureTransformer {
    pub fn new(days_fallback: f64) -> Self {
        Self { days_fallback }
    }

    pub fn transform(&self, joined: JoinedBatch) -> Result<TransformOutput, TransformationError> {
        for column in REAL_TIME_FIELDS.iter().chain(HISTORICAL_FIELDS.iter()) {
            if !joined.has_column(column) {
                return Err(TransformationError::MissingColumn(column.to_string()));
            }
        }

        let rows = joined.into_rows();
        let days_fill = batch_max_days(&rows).unwrap_or(self.days_fallback);

        let mut cleaned = Vec::with_capacity(rows.len());
        let mut dropped_user_ids = BTreeSet::new();

        for row in &rows {
            match clean_row(row, days_fill)? {
                Some(features) => cleaned.push(ScoringRow {
                    user_id: row.user_id,
                    features,
                }),
                None => {
                    dropped_user_ids.insert(row.user_id);
                }
            }
        }

        debug!(
            input = rows.len(),
            cleaned = cleaned.len(),
            dropped = dropped_user_ids.len(),
            days_fill,
            "Batch transformed"
        );

        Ok(TransformOutput {
            table: CleanedTable::new(cleaned),
            dropped_user_ids,
        })
    }
}

/// Largest present `days_since_last_purchase` in the batch, negatives included
fn batch_max_days(rows: &[JoinedRow]) -> Option<f64> {
    rows.iter()
        .filter_map(|r| present(r.days_since_last_purchase))
        .reduce(f64::max)
}

fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Negative or missing → 0
fn non_negative_or_zero(v: Option<f64>) -> f64 {
    match present(v) {
        Some(x) if x >= 0.0 => x,
        _ => 0.0,
    }
}

const PAGE_FIELDS: [&str; 3] = ["last_page_1", "last_page_2", "last_page_3"];

/// `Ok(None)` when the row cannot be salvaged
fn clean_row(row: &JoinedRow, days_fill: f64) -> Result<Option<CleanedRow>, TransformationError> {
    if row.last_page.iter().any(Option::is_none) {
        return Ok(None);
    }

    let mut pages = [0.0; 3];
    for ((slot, page), field) in pages.iter_mut().zip(&row.last_page).zip(PAGE_FIELDS) {
        *slot = match page {
            Some(PageId::Numeric(id)) => *id as f64,
            Some(other) => {
                return Err(TransformationError::UnencodablePage {
                    user_id: row.user_id,
                    field,
                    value: other.to_string(),
                })
            }
            None => return Ok(None),
        };
    }
    let [p1, p2, p3] = pages;

    let [t1, t2, t3] = row.time_spent.map(|t| non_negative_or_zero(t) / 60.0);

    let days = match present(row.days_since_last_purchase) {
        Some(d) if d >= 0.0 => d,
        _ => days_fill,
    };

    let total_time_spent = t1 + t2 + t3;

    Ok(Some(CleanedRow {
        last_page_1: p1,
        last_page_2: p2,
        last_page_3: p3,
        time_spent_1: t1,
        time_spent_2: t2,
        time_spent_3: t3,
        total_purchases: non_negative_or_zero(row.total_purchases),
        total_amount_spent: non_negative_or_zero(row.total_amount_spent),
        average_order_value: non_negative_or_zero(row.average_order_value),
        days_since_last_purchase: days,
        is_returning_customer: u8::from(row.is_returning_customer.unwrap_or(false)),
        total_time_spent,
        avg_time_spent: total_time_spent / 3.0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: i64) -> JoinedRow {
        JoinedRow {
            user_id,
            last_page: [1, 2, 3].map(|p| Some(PageId::from(p))),
            time_spent: [Some(60.0), Some(120.0), Some(180.0)],
            total_purchases: Some(5.0),
            total_amount_spent: Some(250.0),
            average_order_value: Some(50.0),
            days_since_last_purchase: Some(10.0),
            is_returning_customer: Some(true),
        }
    }

    fn transform(rows: Vec<JoinedRow>) -> TransformOutput {
        FeatureTransformer::default()
            .transform(JoinedBatch::new(rows))
            .unwrap()
    }

    #[test]
    fn test_clean_row_derives_minutes_and_totals() {
        let out = transform(vec![row(1)]);
        let cleaned = &out.table.rows()[0].features;

        assert_eq!(cleaned.time_spent_1, 1.0);
        assert_eq!(cleaned.time_spent_2, 2.0);
        assert_eq!(cleaned.time_spent_3, 3.0);
        assert_eq!(cleaned.total_time_spent, 6.0);
        assert_eq!(cleaned.avg_time_spent, 2.0);
        assert_eq!(cleaned.is_returning_customer, 1);
        assert!(out.dropped_user_ids.is_empty());
    }

    #[test]
    fn test_negative_time_spent_becomes_zero_and_row_kept() {
        let mut r = row(7);
        r.time_spent[0] = Some(-5.0);
        let out = transform(vec![r]);

        assert_eq!(out.table.len(), 1);
        assert_eq!(out.table.rows()[0].features.time_spent_1, 0.0);
        assert!(out.dropped_user_ids.is_empty());
    }

    #[test]
    fn test_missing_amount_alone_is_imputed() {
        let mut r = row(3);
        r.total_amount_spent = None;
        let out = transform(vec![r]);

        assert_eq!(out.table.rows()[0].features.total_amount_spent, 0.0);
        assert!(out.dropped_user_ids.is_empty());
    }

    #[test]
    fn test_missing_page_drops_row() {
        let mut bad = row(2);
        bad.total_amount_spent = None;
        bad.last_page[1] = None;
        let out = transform(vec![row(1), bad, row(3)]);

        assert_eq!(out.table.user_ids(), vec![1, 3]);
        assert_eq!(out.dropped_user_ids, BTreeSet::from([2]));
    }

    #[test]
    fn test_days_imputed_with_batch_max() {
        let mut a = row(1);
        a.days_since_last_purchase = Some(40.0);
        let mut b = row(2);
        b.days_since_last_purchase = Some(-1.0);
        let mut c = row(3);
        c.days_since_last_purchase = None;
        let out = transform(vec![a, b, c]);

        let days: Vec<f64> = out
            .table
            .rows()
            .iter()
            .map(|r| r.features.days_since_last_purchase)
            .collect();
        assert_eq!(days, vec![40.0, 40.0, 40.0]);
    }

    #[test]
    fn test_days_all_negative_fill_with_largest_negative() {
        let days: Vec<JoinedRow> = [Some(-3.0), Some(-10.0), None]
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let mut r = row(i as i64);
                r.days_since_last_purchase = d;
                r
            })
            .collect();
        let out = FeatureTransformer::new(0.0)
            .transform(JoinedBatch::new(days))
            .unwrap();

        let filled: Vec<f64> = out
            .table
            .rows()
            .iter()
            .map(|r| r.features.days_since_last_purchase)
            .collect();
        assert_eq!(filled, vec![-3.0, -3.0, -3.0]);
    }

    #[test]
    fn test_categorical_page_fails_batch() {
        let mut r = row(4);
        r.last_page[0] = Some(PageId::Categorical("checkout".to_string()));
        let err = FeatureTransformer::default()
            .transform(JoinedBatch::new(vec![row(1), r]))
            .unwrap_err();

        assert_eq!(err.kind(), "unencodable_page");
        assert!(matches!(
            err,
            TransformationError::UnencodablePage { user_id: 4, field: "last_page_1", .. }
        ));
    }

    #[test]
    fn test_missing_page_drops_row_before_categorical_check() {
        let mut r = row(4);
        r.last_page[0] = Some(PageId::Categorical("checkout".to_string()));
        r.last_page[2] = None;
        let out = transform(vec![row(1), r]);

        assert_eq!(out.table.user_ids(), vec![1]);
        assert_eq!(out.dropped_user_ids, BTreeSet::from([4]));
    }

    #[test]
    fn test_days_fallback_when_no_value_present() {
        let mut a = row(1);
        a.days_since_last_purchase = None;
        let out = FeatureTransformer::new(365.0)
            .transform(JoinedBatch::new(vec![a]))
            .unwrap();
        assert_eq!(out.table.rows()[0].features.days_since_last_purchase, 365.0);
    }

    #[test]
    fn test_history_negatives_and_missing_flag() {
        let mut r = row(1);
        r.total_purchases = Some(-2.0);
        r.average_order_value = Some(f64::NAN);
        r.is_returning_customer = None;
        let out = transform(vec![r]);
        let f = &out.table.rows()[0].features;

        assert_eq!(f.total_purchases, 0.0);
        assert_eq!(f.average_order_value, 0.0);
        assert_eq!(f.is_returning_customer, 0);
    }

    #[test]
    fn test_empty_batch_is_not_an_error() {
        let out = transform(vec![]);
        assert!(out.table.is_empty());
        assert!(out.dropped_user_ids.is_empty());
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let columns = REAL_TIME_FIELDS
            .iter()
            .chain(HISTORICAL_FIELDS.iter().skip(1))
            .filter(|c| **c != "average_order_value")
            .map(|c| c.to_string())
            .collect();
        let err = FeatureTransformer::default()
            .transform(JoinedBatch::with_columns(columns, vec![row(1)]))
            .unwrap_err();
        assert!(matches!(err, TransformationError::MissingColumn(c) if c == "average_order_value"));
    }

    #[test]
    fn test_surviving_and_dropped_partition_input() {
        let rows: Vec<JoinedRow> = (0..50)
            .map(|i| {
                let mut r = row(i);
                if i % 7 == 0 {
                    r.last_page[2] = None;
                }
                if i % 3 == 0 {
                    r.time_spent[1] = Some(-30.0);
                }
                if i % 5 == 0 {
                    r.is_returning_customer = Some(false);
                }
                r
            })
            .collect();
        let out = transform(rows);

        let surviving: BTreeSet<i64> = out.table.user_ids().into_iter().collect();
        assert_eq!(surviving.len(), out.table.len());
        assert!(surviving.is_disjoint(&out.dropped_user_ids));
        assert_eq!(out.dropped_user_ids.len(), 50 - out.table.len());

        for r in out.table.rows() {
            let f = &r.features;
            assert!(f.is_returning_customer <= 1);
            assert!(f.time_spent_1 >= 0.0 && f.time_spent_2 >= 0.0 && f.time_spent_3 >= 0.0);
            assert_eq!(f.total_time_spent, f.time_spent_1 + f.time_spent_2 + f.time_spent_3);
            assert_eq!(f.avg_time_spent, f.total_time_spent / 3.0);
        }
    }
}
