//! Batch scoring endpoint
//!
//! POST /predictions_webhook

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::pipeline::RunRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub batch_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub request_id: u64,
    /// JSON text mapping user id → score
    pub predictions: String,
    pub dropped_user_ids: Vec<i64>,
    /// Batch users with no stored features
    pub unmatched_user_ids: Vec<i64>,
}

/// POST /predictions_webhook
///
/// Runs one ETP batch. The run is cancelled if the client disconnects or the
/// server shuts down before it finishes.
pub async fn predictions_webhook(
    State(state): State<AppState>,
    body: Result<Json<PredictionRequest>, JsonRejection>,
) -> ApiResult<Json<PredictionResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let batch_size = usize::try_from(body.batch_size)
        .ok()
        .filter(|n| (1..=state.max_batch_size).contains(n))
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "batch_size must be between 1 and {}, got {}",
                state.max_batch_size, body.batch_size
            ))
        })?;

    let request_id = state.request_counter.fetch_add(1, Ordering::SeqCst);
    info!(request_id, batch_size, "Prediction request received");

    // Dropping the handler future (client gone) cancels the run
    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let result = state
        .pipeline
        .run(RunRequest { batch_size, request_id }, &cancel)
        .await
        .map_err(|e| {
            let err = ApiError::from(e);
            if err.status().is_server_error() {
                error!(request_id, error = %err, "Prediction request failed");
            } else {
                warn!(request_id, error = %err, "Prediction request rejected");
            }
            err
        })?;

    let predictions = serde_json::to_string(&result.predictions)
        .map_err(|e| ApiError::Internal(format!("Cannot encode predictions: {}", e)))?;

    Ok(Json(PredictionResponse {
        request_id,
        predictions,
        dropped_user_ids: result.dropped_user_ids.into_iter().collect(),
        unmatched_user_ids: result.unmatched_user_ids.into_iter().collect(),
    }))
}

pub fn prediction_routes() -> Router<AppState> {
    Router::new().route("/predictions_webhook", post(predictions_webhook))
}
