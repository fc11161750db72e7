//! Feature extraction
//!
//! Pulls one batch of events off a [`StreamSource`], then inner-joins it with
//! the stored features for the same users.
//!
//! **Batch accumulation:**
//! - Messages are read one at a time until `batch_size` distinct users are held
//! - A repeated `user_id` replaces the earlier record and does not count again
//! - Any malformed message aborts the whole batch
//! - The source's read position is committed before returning, whatever the
//!   outcome, so consumed messages are never replayed
//!
//! A short batch (deadline hit or source closed) is an error, never a smaller
//! success.

use crate::store::{HistoricalStore, StoreError};
use crate::stream::{Poll, StreamError, StreamMessage, StreamSource};
use crate::types::{HistoricalFeatures, JoinedBatch, JoinedRow, PageId, StreamRecord, REAL_TIME_FIELDS};
use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Insufficient batch: requested {requested} records, received {received}")]
    InsufficientBatch { requested: usize, received: usize },

    #[error("Message at offset {offset} is missing required field '{field}'")]
    MissingField { offset: i64, field: &'static str },

    #[error("Malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: i64, reason: String },

    #[error("Message at offset {offset} has unusable user_id {value}")]
    InvalidUserId { offset: i64, value: String },

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::InsufficientBatch { .. } => "insufficient_batch",
            ExtractionError::MissingField { .. } => "missing_field",
            ExtractionError::MalformedMessage { .. } => "malformed_message",
            ExtractionError::InvalidUserId { .. } => "invalid_user_id",
            ExtractionError::Stream(_) => "stream_unavailable",
            ExtractionError::Store(_) => "store_unavailable",
            ExtractionError::Cancelled => "cancelled",
        }
    }
}

/// Joined rows plus the batch users the store had no row for
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBatch {
    pub joined: JoinedBatch,
    pub unmatched_user_ids: BTreeSet<i64>,
    /// Messages taken off the stream, duplicates included
    pub messages_consumed: usize,
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    batch_timeout: Duration,
    poll_interval: Duration,
}

impl FeatureExtractor {
    pub fn new(batch_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            batch_timeout,
            poll_interval,
        }
    }

    /// Read `batch_size` distinct users from `source` and join them with `store`
    pub async fn extract(
        &self,
        source: &mut dyn StreamSource,
        store: &dyn HistoricalStore,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<ExtractedBatch, ExtractionError> {
        let mut messages_consumed = 0;
        let accumulated = self
            .accumulate(source, batch_size, cancel, &mut messages_consumed)
            .await;

        // Commit whatever was consumed, even when accumulation failed
        let committed = source.commit().await;

        let records = match (accumulated, committed) {
            (Ok(records), Ok(())) => records,
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(commit_err)) => {
                warn!(source = source.name(), error = %commit_err, "Failed to commit read position after failed batch");
                return Err(e);
            }
        };

        debug!(
            source = source.name(),
            records = records.len(),
            messages_consumed,
            "Batch accumulated"
        );

        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let user_ids: Vec<i64> = records.iter().map(|r| r.user_id).collect();
        let history = store.fetch(&user_ids).await?;
        let (joined, unmatched_user_ids) = join(records, history);

        info!(
            joined = joined.len(),
            unmatched = unmatched_user_ids.len(),
            "Batch joined with historical features"
        );

        Ok(ExtractedBatch {
            joined,
            unmatched_user_ids,
            messages_consumed,
        })
    }

    async fn accumulate(
        &self,
        source: &mut dyn StreamSource,
        batch_size: usize,
        cancel: &CancellationToken,
        consumed: &mut usize,
    ) -> Result<Vec<StreamRecord>, ExtractionError> {
        let deadline = Instant::now() + self.batch_timeout;
        let mut records: Vec<StreamRecord> = Vec::with_capacity(batch_size);
        let mut slots: HashMap<i64, usize> = HashMap::with_capacity(batch_size);

        let insufficient = |received: usize| ExtractionError::InsufficientBatch {
            requested: batch_size,
            received,
        };

        while records.len() < batch_size {
            if Instant::now() >= deadline {
                return Err(insufficient(records.len()));
            }

            // The deadline also bounds a poll that stalls inside the source
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
                polled = source.poll() => polled?,
                _ = tokio::time::sleep_until(deadline) => return Err(insufficient(records.len())),
            };

            match polled {
                Poll::Message(message) => {
                    *consumed += 1;
                    let record = parse_message(&message)?;
                    match slots.entry(record.user_id) {
                        Entry::Occupied(slot) => {
                            debug!(
                                user_id = record.user_id,
                                offset = message.offset,
                                "Repeated user in batch, keeping latest event"
                            );
                            records[*slot.get()] = record;
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(records.len());
                            records.push(record);
                        }
                    }
                }
                Poll::Idle => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
                        _ = tokio::time::sleep_until(deadline) => return Err(insufficient(records.len())),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Poll::Closed => {
                    debug!(source = source.name(), received = records.len(), "Source closed before batch filled");
                    return Err(insufficient(records.len()));
                }
            }
        }

        Ok(records)
    }
}

/// Inner join on `user_id`, preserving stream order
fn join(
    records: Vec<StreamRecord>,
    history: Vec<HistoricalFeatures>,
) -> (JoinedBatch, BTreeSet<i64>) {
    let mut by_user: HashMap<i64, HistoricalFeatures> = HashMap::with_capacity(history.len());
    for row in history {
        match by_user.entry(row.user_id) {
            Entry::Occupied(_) => {
                warn!(user_id = row.user_id, "Duplicate historical row, keeping the first");
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }

    let mut rows = Vec::with_capacity(records.len());
    let mut unmatched = BTreeSet::new();
    for record in records {
        match by_user.remove(&record.user_id) {
            Some(history) => rows.push(JoinedRow::new(record, history)),
            None => {
                unmatched.insert(record.user_id);
            }
        }
    }

    (JoinedBatch::new(rows), unmatched)
}

/// Decode one stream message into a [`StreamRecord`]
///
/// Payloads are flat JSON objects. A payload that is a JSON string holding
/// the object (double-encoded by some producers) is unwrapped once.
pub fn parse_message(message: &StreamMessage) -> Result<StreamRecord, ExtractionError> {
    let offset = message.offset;
    let malformed = |reason: String| ExtractionError::MalformedMessage { offset, reason };

    let value: Value = serde_json::from_slice(&message.payload)
        .map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| malformed(format!("invalid JSON in string payload: {}", e)))?,
        other => other,
    };

    let Value::Object(fields) = value else {
        return Err(malformed("payload is not a JSON object".to_string()));
    };

    for field in REAL_TIME_FIELDS {
        if !fields.contains_key(field) {
            return Err(ExtractionError::MissingField { offset, field });
        }
    }

    let user_id = coerce_user_id(&fields["user_id"]).ok_or_else(|| ExtractionError::InvalidUserId {
        offset,
        value: fields["user_id"].to_string(),
    })?;

    let page = |name: &str| page_value(value_of(&fields, name)).map_err(|r| malformed(format!("{}: {}", name, r)));
    let seconds = |name: &str| seconds_value(value_of(&fields, name)).map_err(|r| malformed(format!("{}: {}", name, r)));

    Ok(StreamRecord {
        user_id,
        last_page: [page("last_page_1")?, page("last_page_2")?, page("last_page_3")?],
        time_spent: [
            seconds("time_spent_1")?,
            seconds("time_spent_2")?,
            seconds("time_spent_3")?,
        ],
    })
}

fn value_of<'a>(fields: &'a Map<String, Value>, name: &str) -> &'a Value {
    fields.get(name).unwrap_or(&Value::Null)
}

/// Integer, finite float (truncated) or numeric string
fn coerce_user_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_to_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_to_i64))
        }
        _ => None,
    }
}

fn truncate_to_i64(v: f64) -> Option<i64> {
    let t = v.trunc();
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

/// Page identifier: integral numbers and numeric strings are numeric ids,
/// any other string is a categorical label
fn page_value(value: &Value) -> Result<Option<PageId>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(v) => Ok(Some(PageId::Numeric(v))),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(truncate_to_i64(f).map(PageId::Numeric)),
                _ => Err(format!("non-integer page identifier {}", n)),
            },
        },
        Value::String(s) => Ok(Some(match s.trim().parse::<i64>() {
            Ok(id) => PageId::Numeric(id),
            Err(_) => PageId::Categorical(s.clone()),
        })),
        other => Err(format!("unsupported page identifier {}", other)),
    }
}

/// Seconds as a number, numeric string or null
fn seconds_value(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("non-numeric duration {:?}", s)),
        other => Err(format!("unsupported duration {}", other)),
    }
}
