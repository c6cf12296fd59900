//! Watchdog HTTP Service
//!
//! Heartbeat ingest, HTML and JSON status views, health and metrics for the
//! liveness watchdog.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use ledger::{Ledger, RecordLog};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, EnvFilter};

mod error;
mod routes;
mod settings;
mod status_page;

pub use settings::{ConfigError, NotifierKind, WatchdogConfig};
pub use error::ApiError;
pub use status_page::StatusPage;

/// Application state shared across handlers
pub struct AppState {
    /// Liveness ledger, shared with the sweeper
    pub ledger: Arc<Ledger>,
    /// Access/alert record log
    pub records: Arc<RecordLog>,
    pub status_page: StatusPage,
    /// Silence after which the status views call a program stale
    pub stale_threshold: chrono::Duration,
    /// Present when a Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        ledger: Arc<Ledger>,
        records: Arc<RecordLog>,
        status_page: StatusPage,
        stale_threshold: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            records,
            status_page,
            stale_threshold,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    /// Expose `handle` on `/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub programs_tracked: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(routes::status::status_page))
        .route("/api/v1/status", get(routes::status::status_json))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/programs/:id", delete(routes::programs::deregister))
        .route("/metrics", get(metrics_handler))
        .fallback(routes::ingest::heartbeat)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        programs_tracked: state.ledger.len(),
    })
}

/// Prometheus exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
