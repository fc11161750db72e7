//! etp-scorer library interface
//!
//! Batch scoring microservice: pulls a batch of user events from a stream,
//! joins them with stored per-user features, cleans them and scores them with
//! a linear regression model. Exposed as a library for integration testing.

pub mod api;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod store;
pub mod stream;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use etp_common::config::PipelineSettings;
use etp_common::events::EventBus;
use pipeline::{EtpPipeline, FeatureExtractor, FeatureTransformer, Predictor};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EtpPipeline>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Next `request_id` handed out by `/predictions_webhook`
    pub request_counter: Arc<AtomicU64>,
    pub max_batch_size: usize,
    pub startup_time: DateTime<Utc>,
    /// Cancelled on shutdown; each run holds a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<EtpPipeline>, event_bus: EventBus, max_batch_size: usize) -> Self {
        Self {
            pipeline,
            event_bus,
            request_counter: Arc::new(AtomicU64::new(0)),
            max_batch_size,
            startup_time: Utc::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Assemble the pipeline from settings and a loaded model
pub fn build_pipeline(
    settings: &PipelineSettings,
    predictor: Arc<Predictor>,
    event_bus: EventBus,
) -> EtpPipeline {
    EtpPipeline::new(
        FeatureExtractor::new(
            Duration::from_millis(settings.batch_timeout_ms),
            Duration::from_millis(settings.poll_interval_ms),
        ),
        FeatureTransformer::new(settings.days_since_last_purchase_fallback),
        predictor,
        event_bus,
    )
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::root))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .merge(api::resource_routes())
        .merge(api::prediction_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
