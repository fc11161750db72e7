//! ETP Scorer (etp-scorer) - Main entry point
//!
//! Batch scoring microservice: extract a batch of user events, transform
//! them into model features and predict per-user purchase scores.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etp_common::events::EventBus;
use etp_scorer::pipeline::Predictor;
use etp_scorer::{build_pipeline, build_router, resources, AppState};

/// Command-line arguments for etp-scorer
#[derive(Parser, Debug)]
#[command(name = "etp-scorer")]
#[command(about = "Batch purchase scoring microservice")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "ETP_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config file)
    #[arg(short, long, env = "ETP_BIND_ADDR")]
    bind: Option<String>,

    /// Regression model artifact (overrides config file)
    #[arg(short, long, env = "ETP_MODEL_PATH")]
    model: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "ETP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = etp_common::config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("etp_scorer={0},etp_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting etp-scorer v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let port = args.port.unwrap_or(config.port);
    let bind_addr = args.bind.unwrap_or_else(|| config.bind_addr.clone());
    let model_path = args.model.unwrap_or_else(|| config.model_path.clone());

    let predictor = Arc::new(
        Predictor::load(&model_path)
            .with_context(|| format!("Failed to load model from {}", model_path.display()))?,
    );

    let event_bus = EventBus::new(100);
    let pipeline = Arc::new(build_pipeline(
        &config.pipeline,
        Arc::clone(&predictor),
        event_bus.clone(),
    ));

    // Startup wiring is optional; a failure leaves /init_data_resources usable
    if let Some(settings) = &config.resources {
        match resources::connect(settings).await {
            Ok(wired) => pipeline.install(wired).await,
            Err(e) => warn!(error = %e, "Configured resources unavailable, waiting for /init_data_resources"),
        }
    } else {
        info!("No resources configured, waiting for /init_data_resources");
    }

    let state = AppState::new(pipeline, event_bus, config.pipeline.max_batch_size);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_addr, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
