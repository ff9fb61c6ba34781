//! SAM Backend - Android Malware Behavioral Analysis Server
//!
//! Drives uploaded or installed Android apps through the analysis pipeline
//! (trace capture, feature extraction, anomaly scoring, technique mapping)
//! and serves live job status and incremental results while jobs run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SAM BACKEND                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────────┐   ┌─────────────────────┐ │
//! │  │  API      │   │ Orchestrator │   │ Pipeline Scripts    │ │
//! │  │  (Axum)   │──▶│ (job workers)│──▶│ (capture/extract/   │ │
//! │  │           │   │              │   │  score/map)         │ │
//! │  └─────┬─────┘   └──────┬───────┘   └─────────────────────┘ │
//! │        │                ▼                                   │
//! │        │         ┌─────────────┐   ┌─────────────────────┐  │
//! │        └────────▶│  JobStore   │   │  Artifacts (disk)   │  │
//! │                  └─────────────┘   └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod handlers;
mod logic;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logic::artifacts::ResultStore;
use logic::collab::Collaborators;
use logic::jobs::JobStore;
use logic::pipeline::Orchestrator;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sam_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("SAM Backend starting...");
    tracing::info!("Output root: {}", config.output_dir.display());
    tracing::info!("Pipeline dir: {}", config.pipeline_dir.display());

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("creating {}", config.upload_dir.display()))?;

    // Build application state
    let store = Arc::new(JobStore::new());
    let artifacts = Arc::new(ResultStore::new(config.output_dir.clone()));
    let collab = Arc::new(Collaborators::process(&config));
    let orchestrator = Orchestrator::new(store.clone(), artifacts.clone(), collab);

    let state = AppState {
        config,
        store,
        artifacts,
        orchestrator,
    };

    let port = state.config.port;
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<JobStore>,
    pub artifacts: Arc<ResultStore>,
    pub orchestrator: Orchestrator,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/analyze", post(handlers::analyze::analyze))
        .route("/analyze_installed", post(handlers::analyze::analyze_installed))
        .route("/status/:job_id", get(handlers::status::status))
        .route("/result/:job_id", get(handlers::result::result))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
