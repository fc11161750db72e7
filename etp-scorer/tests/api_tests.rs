//! HTTP API integration tests
//!
//! Drive the router with `oneshot`, backed by SQLite files in a temp dir.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use etp_common::config::PipelineSettings;
use etp_common::events::{EventBus, PipelineEvent};
use etp_scorer::api::predictions::PredictionResponse;
use etp_scorer::pipeline::{LinearModel, Predictor};
use etp_scorer::stream::event_log::append_event;
use etp_scorer::types::FEATURE_COLUMNS;
use etp_scorer::{build_pipeline, build_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt;

const TOPIC: &str = "user_events";

fn test_app() -> Router {
    build_router(test_state(300))
}

fn test_state(batch_timeout_ms: u64) -> AppState {
    let model = LinearModel {
        name: "api-test".to_string(),
        version: "2.0".to_string(),
        features: FEATURE_COLUMNS.iter().map(|f| f.to_string()).collect(),
        coefficients: vec![0.5; FEATURE_COLUMNS.len()],
        intercept: 0.0,
    };
    let predictor = Arc::new(Predictor::from_model(model).unwrap());
    let settings = PipelineSettings {
        batch_timeout_ms,
        poll_interval_ms: 10,
        max_batch_size: 100,
        ..PipelineSettings::default()
    };

    let event_bus = EventBus::new(100);
    let pipeline = Arc::new(build_pipeline(&settings, predictor, event_bus.clone()));
    AppState::new(pipeline, event_bus, settings.max_batch_size)
}

async fn file_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
        .await
        .unwrap()
}

/// Events for users `1..=users` plus a features DB covering every user but the last.
/// User 2 gets `user_2_page` as its `last_page_3`.
async fn seed(dir: &TempDir, users: i64, user_2_page: Value) -> (String, String) {
    let events_path = dir.path().join("events.db");
    let features_path = dir.path().join("features.db");

    let events = file_pool(&events_path).await;
    for user_id in 1..=users {
        let last_page_3 = if user_id == 2 { user_2_page.clone() } else { json!(3) };
        let payload = json!({
            "user_id": user_id,
            "last_page_1": 1,
            "last_page_2": 2,
            "last_page_3": last_page_3,
            "time_spent_1": 30,
            "time_spent_2": -5,
            "time_spent_3": 90
        });
        append_event(&events, TOPIC, &payload.to_string()).await.unwrap();
    }
    events.close().await;

    let features = file_pool(&features_path).await;
    sqlx::query(
        r#"
        CREATE TABLE user_features (
            user_id INTEGER PRIMARY KEY,
            total_purchases INTEGER,
            total_amount_spent REAL,
            average_order_value REAL,
            days_since_last_purchase INTEGER,
            is_returning_customer BOOLEAN
        )
        "#,
    )
    .execute(&features)
    .await
    .unwrap();
    for user_id in 1..users {
        sqlx::query("INSERT INTO user_features VALUES (?, 2, 100.0, 50.0, 14, 1)")
            .bind(user_id)
            .execute(&features)
            .await
            .unwrap();
    }
    features.close().await;

    (
        events_path.display().to_string(),
        features_path.display().to_string(),
    )
}

fn init_body(events: &str, features: &str) -> Value {
    json!({
        "stream_config": json!({
            "bootstrap_servers": events,
            "topics": TOPIC,
            "group_id": "api-tests",
            "auto_offset_reset": "earliest",
            "enable_auto_commit": true
        }).to_string(),
        "store_config": json!({ "database": features }).to_string()
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let app = test_app();

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await["message"].is_string());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["module"], "etp-scorer");
    assert_eq!(body["resources_initialized"], false);
    assert_eq!(body["model_name"], "api-test");
    assert_eq!(body["model_version"], "2.0");
}

#[tokio::test]
async fn test_predictions_before_init_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 5})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "RESOURCES_NOT_INITIALIZED");
}

#[tokio::test]
async fn test_invalid_batch_sizes_are_rejected() {
    let app = test_app();
    for batch_size in [json!(0), json!(-3), json!(101), json!("ten")] {
        let response = app
            .clone()
            .oneshot(post("/predictions_webhook", &json!({ "batch_size": batch_size })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "batch_size {}", batch_size);
    }
}

#[tokio::test]
async fn test_malformed_resource_config_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(post(
            "/init_data_resources",
            &json!({"stream_config": "{oops", "store_config": "{}"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_RESOURCE_CONFIG");
}

#[tokio::test]
async fn test_unreachable_store_is_rejected_without_leaking_path() {
    let dir = TempDir::new().unwrap();
    let app = test_app();
    let events = dir.path().join("events.db").display().to_string();
    let missing = dir.path().join("nowhere.db").display().to_string();

    let response = app
        .oneshot(post("/init_data_resources", &init_body(&events, &missing)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "RESOURCE_CONNECTION_FAILED");
    assert!(!body.to_string().contains("nowhere.db"));
}

#[tokio::test]
async fn test_init_then_score_batches() {
    let dir = TempDir::new().unwrap();
    // user 2 has no last page, so cannot be scored
    let (events, features) = seed(&dir, 6, Value::Null).await;
    let app = test_app();

    let response = app
        .clone()
        .oneshot(post("/init_data_resources", &init_body(&events, &features)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["topic"], TOPIC);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(json_body(response).await["resources_initialized"], true);

    let response = app
        .clone()
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first: PredictionResponse = serde_json::from_value(json_body(response).await).unwrap();
    let scores: BTreeMap<String, f64> = serde_json::from_str(&first.predictions).unwrap();

    assert_eq!(first.request_id, 0);
    assert_eq!(scores.keys().cloned().collect::<Vec<_>>(), vec!["1", "3"]);
    assert_eq!(first.dropped_user_ids, vec![2]);
    assert!(first.unmatched_user_ids.is_empty());

    let response = app
        .clone()
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second: PredictionResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(second.request_id, 1);
    assert_eq!(second.unmatched_user_ids, vec![6]);

    // Stream drained: short batch
    let response = app
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_BATCH");
    assert_eq!(body["error"]["stage"], "extract");
}

#[tokio::test]
async fn test_legacy_config_field_names() {
    let dir = TempDir::new().unwrap();
    let (events, features) = seed(&dir, 2, json!(3)).await;
    let app = test_app();

    let body = init_body(&events, &features);
    let legacy = json!({
        "kafka_config": body["stream_config"],
        "mysql_config": body["store_config"]
    });
    let response = app
        .oneshot(post("/init_data_resources", &legacy))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_categorical_page_fails_run_at_transform() {
    let dir = TempDir::new().unwrap();
    let (events, features) = seed(&dir, 3, json!("landing")).await;
    let app = test_app();

    let response = app
        .clone()
        .oneshot(post("/init_data_resources", &init_body(&events, &features)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 3})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "UNENCODABLE_PAGE");
    assert_eq!(body["error"]["stage"], "transform");
}

#[tokio::test]
async fn test_shutdown_cancels_waiting_run() {
    let dir = TempDir::new().unwrap();
    let (events, features) = seed(&dir, 1, json!(3)).await;
    let state = test_state(30_000);
    let shutdown = state.shutdown.clone();
    let mut rx = state.event_bus.subscribe();
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(post("/init_data_resources", &init_body(&events, &features)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let started = Instant::now();
    let response = app
        .oneshot(post("/predictions_webhook", &json!({"batch_size": 5})))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "CANCELLED");

    let mut saw_cancel = false;
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::RunFailed { kind, .. } = event {
            assert_eq!(kind, "cancelled");
            saw_cancel = true;
        }
    }
    assert!(saw_cancel);
}

#[tokio::test]
async fn test_abandoned_request_releases_pipeline() {
    let dir = TempDir::new().unwrap();
    let (events, features) = seed(&dir, 4, json!(3)).await;
    let app = build_router(test_state(30_000));

    let response = app
        .clone()
        .oneshot(post("/init_data_resources", &init_body(&events, &features)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Waits for a sixth user that never arrives until the client goes away
    let abandoned = tokio::spawn(
        app.clone()
            .oneshot(post("/predictions_webhook", &json!({"batch_size": 6}))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    let events_pool = file_pool(Path::new(&events)).await;
    for user_id in 10..12 {
        let payload = json!({
            "user_id": user_id,
            "last_page_1": 1, "last_page_2": 2, "last_page_3": 3,
            "time_spent_1": 30, "time_spent_2": 30, "time_spent_3": 30
        });
        append_event(&events_pool, TOPIC, &payload.to_string()).await.unwrap();
    }
    events_pool.close().await;

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        app.oneshot(post("/predictions_webhook", &json!({"batch_size": 2}))),
    )
    .await
    .expect("pipeline still held by the abandoned request")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_event_stream_is_sse() {
    let app = test_app();
    let response = app.oneshot(get("/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
}
