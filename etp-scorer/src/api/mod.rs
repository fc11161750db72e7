//! HTTP API handlers for etp-scorer
//!
//! - `GET /` welcome message
//! - `GET /health` liveness plus model and resource status
//! - `POST /init_data_resources` wire stream and store
//! - `POST /predictions_webhook` score one batch
//! - `GET /events` SSE pipeline events

pub mod health;
pub mod predictions;
pub mod resources;
pub mod sse;

pub use health::health_routes;
pub use predictions::prediction_routes;
pub use resources::resource_routes;
pub use sse::event_stream;

use axum::Json;
use serde_json::{json, Value};

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to the ETP scoring service" }))
}
