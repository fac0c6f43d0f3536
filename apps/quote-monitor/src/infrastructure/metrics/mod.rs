//! Prometheus Metrics Module
//!
//! Exposes monitor metrics via Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Stream frames received and dropped by kind
//! - **Connection**: Stream state, reconnect attempts and the active source
//! - **Snapshots**: REST fetch outcomes and cycle latency
//! - **Pipeline**: Coalesced batches, store size and triggered alerts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market::DataSource;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder. Later calls return the
/// handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_monitor_frames_received_total",
        "Stream frames received by kind"
    );
    describe_counter!(
        "quote_monitor_frames_dropped_total",
        "Stream frames discarded by reason"
    );

    describe_gauge!(
        "quote_monitor_stream_connected",
        "1 while the quote socket is open"
    );
    describe_counter!(
        "quote_monitor_reconnects_total",
        "Stream reconnect attempts"
    );
    describe_gauge!(
        "quote_monitor_active_source",
        "Currently scheduled data source (1 = active)"
    );

    describe_counter!(
        "quote_monitor_rest_fetches_total",
        "REST quote fetches by outcome"
    );
    describe_histogram!(
        "quote_monitor_rest_cycle_seconds",
        "Duration of a full REST snapshot cycle"
    );

    describe_counter!(
        "quote_monitor_batches_flushed_total",
        "Coalesced update batches applied to the store"
    );
    describe_gauge!("quote_monitor_quotes_stored", "Symbols in the quote store");
    describe_counter!(
        "quote_monitor_alerts_triggered_total",
        "Price alerts triggered by condition"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a single REST fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Quote mapped successfully.
    Success,
    /// Transport or status failure.
    Failed,
    /// Body could not be mapped.
    Invalid,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
        }
    }
}

/// Record a stream frame by kind (`main`, `index`, `heartbeat`).
pub fn record_frame(kind: &'static str) {
    counter!("quote_monitor_frames_received_total", "kind" => kind).increment(1);
}

/// Record a discarded stream frame.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("quote_monitor_frames_dropped_total", "reason" => reason).increment(1);
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("quote_monitor_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a stream reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("quote_monitor_reconnects_total").increment(1);
}

/// Mark `source` active and the other source inactive. `None` clears both.
pub fn set_active_source(source: Option<DataSource>) {
    for candidate in [DataSource::Stream, DataSource::Polling] {
        let value = if source == Some(candidate) { 1.0 } else { 0.0 };
        gauge!("quote_monitor_active_source", "source" => candidate.as_str()).set(value);
    }
}

/// Record one REST fetch.
pub fn record_rest_fetch(outcome: FetchOutcome) {
    counter!("quote_monitor_rest_fetches_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a full REST cycle.
pub fn record_rest_cycle(duration: Duration) {
    histogram!("quote_monitor_rest_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a coalesced batch applied to the store.
pub fn record_batch_flushed(source: DataSource) {
    counter!("quote_monitor_batches_flushed_total", "source" => source.as_str()).increment(1);
}

/// Update the quote store size.
#[allow(clippy::cast_precision_loss)]
pub fn set_quotes_stored(count: usize) {
    gauge!("quote_monitor_quotes_stored").set(count as f64);
}

/// Record a triggered alert.
pub fn record_alert_triggered(condition: &'static str) {
    counter!("quote_monitor_alerts_triggered_total", "condition" => condition).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
