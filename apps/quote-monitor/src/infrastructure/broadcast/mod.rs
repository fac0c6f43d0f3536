//! Event Hub
//!
//! Fan-out of pipeline events over tokio broadcast channels. Every consumer
//! (presentation layer, alert logger, health endpoint) subscribes
//! independently:
//!
//! - quote batches, one per coalescer flush or REST poll
//! - connection status transitions
//! - alert notifications
//!
//! The hub also remembers the latest status so late subscribers can read it.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::application::ports::EventSink;
use crate::domain::alert::AlertNotification;
use crate::domain::market::{ConnectionStatus, DataSource, QuoteBatch, StatusUpdate};

/// Channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHubConfig {
    /// Quote batch channel capacity.
    pub quote_batches_capacity: usize,
    /// Status channel capacity.
    pub status_capacity: usize,
    /// Alert channel capacity.
    pub alerts_capacity: usize,
}

impl Default for EventHubConfig {
    fn default() -> Self {
        Self {
            quote_batches_capacity: 256,
            status_capacity: 64,
            alerts_capacity: 64,
        }
    }
}

/// A batch as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct QuoteBatchEvent {
    /// Source that produced the batch.
    pub source: DataSource,
    /// Quotes by symbol.
    pub quotes: Arc<QuoteBatch>,
}

/// Central hub for pipeline events.
#[derive(Debug)]
pub struct EventHub {
    quote_batches_tx: broadcast::Sender<QuoteBatchEvent>,
    status_tx: broadcast::Sender<StatusUpdate>,
    alerts_tx: broadcast::Sender<AlertNotification>,
    latest_status: RwLock<StatusUpdate>,
}

/// Shared handle.
pub type SharedEventHub = Arc<EventHub>;

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EventHubConfig::default())
    }
}

impl EventHub {
    /// Hub with the given capacities.
    #[must_use]
    pub fn new(config: EventHubConfig) -> Self {
        Self {
            quote_batches_tx: broadcast::channel(config.quote_batches_capacity).0,
            status_tx: broadcast::channel(config.status_capacity).0,
            alerts_tx: broadcast::channel(config.alerts_capacity).0,
            latest_status: RwLock::new(StatusUpdate::default()),
        }
    }

    // =========================================================================
    // Quote batches
    // =========================================================================

    /// Publish a batch. Returns the receiver count, `None` without receivers.
    pub fn publish_quotes(&self, source: DataSource, quotes: Arc<QuoteBatch>) -> Option<usize> {
        self.quote_batches_tx
            .send(QuoteBatchEvent { source, quotes })
            .ok()
    }

    /// New quote batch receiver.
    #[must_use]
    pub fn quote_batches_rx(&self) -> broadcast::Receiver<QuoteBatchEvent> {
        self.quote_batches_tx.subscribe()
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Record and publish a status transition.
    pub fn publish_status(&self, update: StatusUpdate) -> Option<usize> {
        tracing::info!(status = %update.status, detail = %update.detail, "Connection status");
        *self.latest_status.write() = update.clone();
        self.status_tx.send(update).ok()
    }

    /// Shorthand for [`Self::publish_status`].
    pub fn set_status(&self, status: ConnectionStatus, detail: impl Into<String>) -> Option<usize> {
        self.publish_status(StatusUpdate::new(status, detail))
    }

    /// Most recent status.
    #[must_use]
    pub fn latest_status(&self) -> StatusUpdate {
        self.latest_status.read().clone()
    }

    /// New status receiver.
    #[must_use]
    pub fn status_rx(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Publish an alert notification.
    pub fn publish_alert(&self, notification: AlertNotification) -> Option<usize> {
        self.alerts_tx.send(notification).ok()
    }

    /// New alert receiver.
    #[must_use]
    pub fn alerts_rx(&self) -> broadcast::Receiver<AlertNotification> {
        self.alerts_tx.subscribe()
    }

    /// Receiver counts per channel.
    #[must_use]
    pub fn stats(&self) -> EventHubStats {
        EventHubStats {
            quote_batch_receivers: self.quote_batches_tx.receiver_count(),
            status_receivers: self.status_tx.receiver_count(),
            alert_receivers: self.alerts_tx.receiver_count(),
        }
    }
}

impl EventSink for EventHub {
    fn quotes_applied(&self, source: DataSource, quotes: Arc<QuoteBatch>) {
        self.publish_quotes(source, quotes);
    }

    fn status_changed(&self, status: ConnectionStatus, detail: String) {
        self.set_status(status, detail);
    }

    fn alert_triggered(&self, notification: AlertNotification) {
        self.publish_alert(notification);
    }
}

/// Receiver counts per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventHubStats {
    /// Quote batch receivers.
    pub quote_batch_receivers: usize,
    /// Status receivers.
    pub status_receivers: usize,
    /// Alert receivers.
    pub alert_receivers: usize,
}
