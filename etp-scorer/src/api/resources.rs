//! Resource wiring endpoint
//!
//! POST /init_data_resources

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::resources::{self, DataResourceConfig};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct InitResourcesResponse {
    pub message: String,
    pub topic: String,
    pub group_id: String,
}

/// POST /init_data_resources
///
/// Decodes the JSON-encoded stream and store settings, connects both and
/// swaps them into the pipeline. Any in-flight run finishes first.
pub async fn init_data_resources(
    State(state): State<AppState>,
    body: Result<Json<DataResourceConfig>, JsonRejection>,
) -> ApiResult<Json<InitResourcesResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let settings = body.parse().map_err(|e| {
        warn!(error = %e, "Rejected resource configuration");
        ApiError::from(e)
    })?;

    let wired = resources::connect(&settings).await.map_err(|e| {
        warn!(error = %e, "Resource connection failed");
        ApiError::from(e)
    })?;

    state.pipeline.install(wired).await;
    info!(topic = %settings.stream.topics, "Resources initialized via API");

    Ok(Json(InitResourcesResponse {
        message: "Stream and store initialized successfully.".to_string(),
        topic: settings.stream.topics,
        group_id: settings.stream.group_id,
    }))
}

pub fn resource_routes() -> Router<AppState> {
    Router::new().route("/init_data_resources", post(init_data_resources))
}
