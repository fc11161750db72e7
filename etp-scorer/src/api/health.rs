//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Module name ("etp-scorer")
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Stream and store wired via `/init_data_resources` or config
    pub resources_initialized: bool,
    pub model_name: String,
    pub model_version: String,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let model = state.pipeline.predictor().model();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "etp-scorer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        resources_initialized: state.pipeline.is_ready(),
        model_name: model.name.clone(),
        model_version: model.version.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
