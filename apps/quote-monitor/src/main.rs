//! Quote Monitor Binary
//!
//! Starts the portfolio quote monitor.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-monitor
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_WATCHLIST`: comma-separated symbols followed at startup
//! - `QUOTE_STREAM_URL`: public stream (ws/wss)
//! - `QUOTE_CUSTOM_SOURCE_URL`: self-hosted stream (ws/wss)
//! - `QUOTE_USE_CUSTOM_SOURCE`: stream from the custom source around the clock
//! - `QUOTE_REST_BASE_URL`: REST quote endpoint
//! - `QUOTE_DISPLAY_INDEX`, `QUOTE_DISPLAY_VOLUME`, `QUOTE_SELL_WATCHING`: toggles
//! - `QUOTE_MONITOR_HEALTH_PORT`: health / read API port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `quote_monitor=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_monitor::application::services::SchedulerDeps;
use quote_monitor::infrastructure::telemetry;
use quote_monitor::{
    ConnectionConfig, ConnectionManager, EventHub, EventHubConfig, FrameCodec, HealthServer,
    HealthServerState, Monitor, MonitorConfig, RestFetcher, SharedEventHub, SystemClock,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the decoded stream quote channel.
const STREAM_QUOTE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Monitor");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = MonitorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let events: SharedEventHub = Arc::new(EventHub::new(EventHubConfig::default()));

    let (quote_tx, quote_rx) = mpsc::channel(STREAM_QUOTE_CAPACITY);
    let stream = Arc::new(ConnectionManager::new(
        ConnectionConfig::from_feed_settings(&config.feed),
        FrameCodec::new(config.calendar),
        quote_tx,
        Arc::clone(&events),
        shutdown_token.clone(),
    ));
    let snapshots = Arc::new(
        RestFetcher::new(&config.rest, config.calendar).context("failed to build REST client")?,
    );

    let deps = SchedulerDeps {
        stream,
        snapshots,
        clock: Arc::new(SystemClock),
        events: Arc::clone(&events) as _,
    };
    let monitor = Arc::new(Monitor::new(
        deps,
        config.monitor_options(),
        config.monitor_settings(),
        shutdown_token.clone(),
    ));

    for symbol in &config.watchlist {
        if let Err(e) = monitor.add_following(symbol) {
            tracing::warn!(symbol = %symbol, error = %e, "Skipping watchlist entry");
        }
    }

    let mut tasks = monitor.start(quote_rx)?;
    tasks.push(spawn_event_logger(&events, shutdown_token.clone()));

    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&monitor),
            Arc::clone(&events),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tasks.push(tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }));
    }

    tracing::info!("Quote monitor ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out with tasks still running");
    }

    tracing::info!("Quote monitor stopped");
    Ok(())
}

/// Log status changes and fired alerts until shutdown.
fn spawn_event_logger(events: &EventHub, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut status_rx = events.status_rx();
    let mut alerts_rx = events.alerts_rx();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                Ok(update) = status_rx.recv() => {
                    tracing::info!(
                        status = %update.status,
                        detail = %update.detail,
                        "Connection status"
                    );
                }
                Ok(alert) = alerts_rx.recv() => {
                    tracing::warn!(
                        symbol = %alert.symbol,
                        message = %alert.message,
                        "Alert"
                    );
                }
                else => return,
            }
        }
    })
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &MonitorConfig) {
    tracing::info!(
        watchlist = config.watchlist.len(),
        use_custom_source = config.display.use_custom_source,
        display_index = config.display.display_index,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.active_stream_url(),
        rest_base_url = %config.rest.base_url,
        "Quote endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
