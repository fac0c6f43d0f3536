//! Health Check, Metrics and Read API
//!
//! HTTP endpoint for health checks, Prometheus metrics and read-only views of
//! the monitor state.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready once quotes have been stored)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /quotes` - latest quote per symbol
//! - `GET /quotes/{symbol}` - latest quote for one symbol
//! - `GET /portfolio/summary` - portfolio totals
//! - `GET /portfolio/rows` - per-position rows
//! - `GET /portfolio/stats` - holding statistics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::Monitor;
use crate::domain::market::{ConnectionStatus, DataSource};
use crate::infrastructure::broadcast::SharedEventHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Monitor version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream and polling state.
    pub source: SourceInfo,
    /// Quote store statistics.
    pub quotes: QuoteStoreInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The active source is delivering.
    Healthy,
    /// Streaming is scheduled but the socket is not open.
    Degraded,
    /// No source is running.
    Unhealthy,
}

/// Data source state.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// Active source, if any.
    pub active: Option<DataSource>,
    /// Last connection status.
    pub connection: ConnectionStatus,
    /// Detail of the last status change.
    pub detail: String,
    /// When the status last changed.
    pub since: DateTime<Utc>,
}

/// Quote store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteStoreInfo {
    /// Symbols with a quote.
    pub symbols: usize,
    /// Batches merged so far.
    pub merges: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    monitor: Arc<Monitor>,
    events: SharedEventHub,
}

impl std::fmt::Debug for HealthServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthServerState")
            .field("version", &self.version)
            .field("uptime_secs", &self.started_at.elapsed().as_secs())
            .finish_non_exhaustive()
    }
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, monitor: Arc<Monitor>, events: SharedEventHub) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            monitor,
            events,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
#[derive(Debug)]
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/quotes", get(quotes_handler))
        .route("/quotes/{symbol}", get(quote_handler))
        .route("/portfolio/summary", get(summary_handler))
        .route("/portfolio/rows", get(rows_handler))
        .route("/portfolio/stats", get(stats_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.monitor.store().merge_count() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn quotes_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.monitor.quotes())
}

async fn quote_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    state.monitor.quote(&symbol).map_or_else(
        || StatusCode::NOT_FOUND.into_response(),
        |quote| Json(quote).into_response(),
    )
}

async fn summary_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.monitor.summary())
}

async fn rows_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.monitor.rows())
}

async fn stats_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.monitor.stats())
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let latest = state.events.latest_status();
    let active = state.monitor.active_source();
    let store = state.monitor.store();

    HealthResponse {
        status: determine_health_status(active, latest.status),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        source: SourceInfo {
            active,
            connection: latest.status,
            detail: latest.detail,
            since: latest.at,
        },
        quotes: QuoteStoreInfo {
            symbols: store.len(),
            merges: store.merge_count(),
        },
    }
}

const fn determine_health_status(
    active: Option<DataSource>,
    connection: ConnectionStatus,
) -> HealthStatus {
    match (active, connection) {
        (None, _) => HealthStatus::Unhealthy,
        (Some(DataSource::Polling), _) | (Some(DataSource::Stream), ConnectionStatus::Connected) => {
            HealthStatus::Healthy
        }
        (Some(DataSource::Stream), _) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
