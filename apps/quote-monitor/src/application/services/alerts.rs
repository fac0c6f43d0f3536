//! Alert Evaluation Loop
//!
//! Checks every untriggered alert against the quote store on a fixed
//! cadence and publishes a notification for each one that fires. Fired
//! alerts stay quiet until they are reset.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Clock, EventSink};
use crate::domain::alert::{self, Alert, AlertNotification};
use crate::domain::market::QuoteStore;
use crate::infrastructure::metrics;

/// Alerts shared between the API and the evaluation loop.
pub type SharedAlerts = Arc<Mutex<Vec<Alert>>>;

/// Periodic alert evaluator.
pub struct AlertService {
    alerts: SharedAlerts,
    store: Arc<QuoteStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("alerts", &self.alerts.lock().len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl AlertService {
    /// Evaluator over `alerts` and `store`, running every `interval`.
    #[must_use]
    pub fn new(
        alerts: SharedAlerts,
        store: Arc<QuoteStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            alerts,
            store,
            events,
            clock,
            interval,
        }
    }

    /// Evaluate once and publish what fired.
    pub fn evaluate_once(&self) -> Vec<AlertNotification> {
        let mut alerts = self.alerts.lock();
        if alerts.iter().all(|a| a.triggered) {
            return Vec::new();
        }
        let quotes = self.store.snapshot();
        let fired = alert::evaluate(&mut alerts, &quotes, self.clock.now());
        drop(alerts);

        for notification in &fired {
            tracing::info!(
                alert_id = %notification.alert_id,
                symbol = %notification.symbol,
                condition = notification.condition.as_str(),
                message = %notification.message,
                "Alert triggered"
            );
            metrics::record_alert_triggered(notification.condition.as_str());
            self.events.alert_triggered(notification.clone());
        }
        fired
    }

    /// Evaluate on every tick until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                _ = tick.tick() => {
                    self.evaluate_once();
                }
            }
        }
    }
}
