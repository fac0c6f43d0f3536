//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamControl`: the streaming socket (connect, disconnect, subscribe)
//! - `QuoteSnapshotSource`: one-shot quote snapshots over REST
//! - `EventSink`: fan-out of applied batches, status changes and alerts
//! - `Clock`: wall clock, replaceable in tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::alert::AlertNotification;
use crate::domain::market::{ConnectionStatus, DataSource, QuoteBatch};

/// Control surface of the streaming connection.
#[cfg_attr(test, mockall::automock)]
pub trait StreamControl: Send + Sync {
    /// Open the stream at `url`, replacing any current session.
    fn connect(&self, url: &str);

    /// Close the stream and cancel any pending reconnect.
    fn disconnect(&self);

    /// True while the socket is open.
    fn is_connected(&self) -> bool;

    /// Replace the subscribed symbols; re-sent at once while connected and
    /// after every reconnect.
    fn set_subscriptions(&self, symbols: Vec<String>, include_indices: bool);
}

/// Fetches a snapshot of quotes for many symbols.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSnapshotSource: Send + Sync {
    /// Fetch every symbol; failures are left out of the result.
    async fn fetch_all(&self, symbols: &[String], include_indices: bool) -> QuoteBatch;
}

/// Receives pipeline events for downstream consumers.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// A batch was merged into the quote store.
    fn quotes_applied(&self, source: DataSource, quotes: Arc<QuoteBatch>);

    /// Connection status changed.
    fn status_changed(&self, status: ConnectionStatus, detail: String);

    /// An alert fired.
    fn alert_triggered(&self, notification: AlertNotification);
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
