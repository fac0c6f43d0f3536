//! Quote Monitor
//!
//! The process-level orchestrator. Owns the portfolio, the alerts, the user
//! settings and the quote store, and wires the ingestion pipeline:
//!
//! ```text
//! stream frames -> coalescer -+
//!                             +-> writer -> QuoteStore -> events
//! REST snapshots (scheduler) -+
//! ```
//!
//! Every portfolio change recomputes the symbols of interest and pushes
//! them to whichever source is active.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::alerts::{AlertService, SharedAlerts};
use super::coalescer::{CoalescerConfig, UpdateCoalescer};
use super::ingest::{IngestBatch, QuoteWriter};
use super::scheduler::{DataSourceScheduler, SchedulerConfig, SchedulerDeps, SourceTarget};
use crate::domain::alert::{Alert, AlertCondition};
use crate::domain::market::{DataSource, Quote, QuoteBatch, QuoteStore, TradingCalendar};
use crate::domain::portfolio::{
    Order, OrderSide, Portfolio, PortfolioCalculator, PortfolioError, PortfolioStats,
    PortfolioSummary, PositionRow,
};

// =============================================================================
// Settings
// =============================================================================

/// User-adjustable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Subscribe to and fetch index quotes.
    pub display_index: bool,
    /// Show summed book volumes.
    pub display_volume: bool,
    /// Include sell lines in the aggregate diff.
    pub sell_watching: bool,
    /// Stream from the custom source around the clock.
    pub use_custom_source: bool,
    /// Public stream URL.
    pub stream_url: String,
    /// Self-hosted stream URL.
    pub custom_source_url: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            display_index: true,
            display_volume: false,
            sell_watching: true,
            use_custom_source: false,
            stream_url: String::new(),
            custom_source_url: String::new(),
        }
    }
}

impl MonitorSettings {
    fn target(&self, symbols: Vec<String>) -> SourceTarget {
        SourceTarget {
            stream_url: self.stream_url.clone(),
            custom_source_url: self.custom_source_url.clone(),
            use_custom_source: self.use_custom_source,
            symbols,
            include_indices: self.display_index,
        }
    }
}

/// Timing and sizing of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    /// Exchange clock.
    pub calendar: TradingCalendar,
    /// Source scheduling.
    pub scheduler: SchedulerConfig,
    /// Stream coalescing.
    pub coalescer: CoalescerConfig,
    /// Alert evaluation period.
    pub alert_interval: Duration,
    /// Ingest channel capacity.
    pub ingest_capacity: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            calendar: TradingCalendar::default(),
            scheduler: SchedulerConfig::default(),
            coalescer: CoalescerConfig::default(),
            alert_interval: Duration::from_secs(5),
            ingest_capacity: 256,
        }
    }
}

/// Rejected monitor operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// Invalid portfolio change.
    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    /// Unknown alert id.
    #[error("alert not found: {0}")]
    AlertNotFound(Uuid),

    /// `start` was already called.
    #[error("monitor already started")]
    AlreadyStarted,
}

// =============================================================================
// Monitor
// =============================================================================

/// Portfolio quote monitor.
pub struct Monitor {
    deps: SchedulerDeps,
    options: MonitorOptions,
    shutdown: CancellationToken,
    store: Arc<QuoteStore>,
    portfolio: RwLock<Portfolio>,
    alerts: SharedAlerts,
    settings: RwLock<MonitorSettings>,
    scheduler: DataSourceScheduler,
    ingest_rx: Mutex<Option<mpsc::Receiver<IngestBatch>>>,
    ingest_tx: mpsc::Sender<IngestBatch>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("settings", &*self.settings.read())
            .field("quotes", &self.store.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Build a monitor. Nothing runs until [`Self::start`].
    #[must_use]
    pub fn new(
        deps: SchedulerDeps,
        options: MonitorOptions,
        settings: MonitorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(options.ingest_capacity.max(1));
        let scheduler = DataSourceScheduler::new(
            deps.clone(),
            options.scheduler,
            options.calendar,
            settings.target(Vec::new()),
            ingest_tx.clone(),
            shutdown.clone(),
        );

        Self {
            deps,
            options,
            shutdown,
            store: Arc::new(QuoteStore::new()),
            portfolio: RwLock::new(Portfolio::new()),
            alerts: Arc::new(Mutex::new(Vec::new())),
            settings: RwLock::new(settings),
            scheduler,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            ingest_tx,
        }
    }

    /// Spawn the pipeline: store writer, stream coalescer, source scheduler
    /// and alert loop. `stream_quotes` carries decoded stream quotes.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyStarted`] on a second call.
    pub fn start(
        &self,
        stream_quotes: mpsc::Receiver<Quote>,
    ) -> Result<Vec<JoinHandle<()>>, MonitorError> {
        let ingest_rx = self
            .ingest_rx
            .lock()
            .take()
            .ok_or(MonitorError::AlreadyStarted)?;

        let writer = QuoteWriter::new(Arc::clone(&self.store), Arc::clone(&self.deps.events));
        let coalescer = UpdateCoalescer::new(self.options.coalescer);
        let alerts = AlertService::new(
            Arc::clone(&self.alerts),
            Arc::clone(&self.store),
            Arc::clone(&self.deps.events),
            Arc::clone(&self.deps.clock),
            self.options.alert_interval,
        );
        let scheduler = self.scheduler.clone();

        let handles = vec![
            tokio::spawn(writer.run(ingest_rx, self.shutdown.clone())),
            tokio::spawn(coalescer.run(
                stream_quotes,
                self.ingest_tx.clone(),
                self.shutdown.clone(),
            )),
            tokio::spawn(async move { scheduler.run().await }),
            tokio::spawn(alerts.run(self.shutdown.clone())),
        ];
        tracing::info!("Quote monitor started");
        Ok(handles)
    }

    // =========================================================================
    // Quotes and sources
    // =========================================================================

    /// Shared quote store.
    #[must_use]
    pub fn store(&self) -> Arc<QuoteStore> {
        Arc::clone(&self.store)
    }

    /// Copy of the canonical quote map.
    #[must_use]
    pub fn quotes(&self) -> QuoteBatch {
        self.store.snapshot()
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.store.get(&symbol.trim().to_uppercase())
    }

    /// Source currently feeding the store.
    #[must_use]
    pub fn active_source(&self) -> Option<DataSource> {
        self.scheduler.active_source()
    }

    /// Source scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &DataSourceScheduler {
        &self.scheduler
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> MonitorSettings {
        self.settings.read().clone()
    }

    /// Replace the settings and re-target the active source.
    pub fn update_settings(&self, settings: MonitorSettings) {
        *self.settings.write() = settings;
        self.refresh_subscriptions();
    }

    fn refresh_subscriptions(&self) {
        let symbols = self.portfolio.read().symbols_of_interest();
        let target = self.settings.read().target(symbols);
        let before = self.scheduler.target();
        let added = target.symbols.iter().any(|s| !before.symbols.contains(s))
            || (target.include_indices && !before.include_indices);
        self.scheduler.update_target(target);
        if added {
            self.scheduler.poll_now();
        }
    }

    fn mutate_portfolio<T>(&self, change: impl FnOnce(&mut Portfolio) -> T) -> T {
        let result = change(&mut self.portfolio.write());
        self.refresh_subscriptions();
        result
    }

    // =========================================================================
    // Portfolio
    // =========================================================================

    /// Copy of the portfolio.
    #[must_use]
    pub fn portfolio(&self) -> Portfolio {
        self.portfolio.read().clone()
    }

    /// Follow a symbol. Returns `false` if it was already followed.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty symbol.
    pub fn add_following(&self, symbol: &str) -> Result<bool, MonitorError> {
        Ok(self.mutate_portfolio(|p| p.add_following(symbol))?)
    }

    /// Stop following a symbol.
    pub fn remove_following(&self, symbol: &str) -> bool {
        self.mutate_portfolio(|p| p.remove_following(symbol))
    }

    /// Add shares to a holding.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty symbol or zero quantity.
    pub fn add_holding(&self, symbol: &str, quantity: u64) -> Result<(), MonitorError> {
        Ok(self.mutate_portfolio(|p| p.add_holding(symbol, quantity))?)
    }

    /// Replace a holding's quantity.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown symbol or zero quantity.
    pub fn update_holding(&self, symbol: &str, quantity: u64) -> Result<(), MonitorError> {
        Ok(self.mutate_portfolio(|p| p.update_holding(symbol, quantity))?)
    }

    /// Remove a holding.
    pub fn remove_holding(&self, symbol: &str) -> bool {
        self.mutate_portfolio(|p| p.remove_holding(symbol))
    }

    /// Add a buy or sell order line; `fee_rate` defaults per side. Returns
    /// the index of the line holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is invalid.
    pub fn add_order(
        &self,
        side: OrderSide,
        symbol: &str,
        quantity: u64,
        price: Decimal,
        fee_rate: Option<Decimal>,
    ) -> Result<usize, MonitorError> {
        let order = Order::new(
            symbol,
            quantity,
            price,
            fee_rate.unwrap_or_else(|| side.default_fee()),
        )?;
        Ok(self.mutate_portfolio(|p| p.add_order(side, order))?)
    }

    /// Replace the order line at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is invalid or the line does not exist.
    pub fn update_order(
        &self,
        side: OrderSide,
        index: usize,
        symbol: &str,
        quantity: u64,
        price: Decimal,
        fee_rate: Option<Decimal>,
    ) -> Result<(), MonitorError> {
        let order = Order::new(
            symbol,
            quantity,
            price,
            fee_rate.unwrap_or_else(|| side.default_fee()),
        )?;
        Ok(self.mutate_portfolio(|p| p.update_order(side, index, order))?)
    }

    /// Remove every order line of `symbol` on one side.
    pub fn remove_orders(&self, side: OrderSide, symbol: &str) -> usize {
        self.mutate_portfolio(|p| p.remove_orders(side, symbol))
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Add an alert. Returns its id.
    pub fn add_alert(&self, symbol: &str, condition: AlertCondition, threshold: Decimal) -> Uuid {
        let alert = Alert::new(symbol, condition, threshold);
        let id = alert.id;
        self.alerts.lock().push(alert);
        tracing::debug!(alert_id = %id, condition = condition.as_str(), "Alert added");
        id
    }

    /// Remove an alert.
    pub fn remove_alert(&self, id: Uuid) -> bool {
        let mut alerts = self.alerts.lock();
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        alerts.len() != before
    }

    /// Change an alert's symbol, condition or threshold. Any change re-arms
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlertNotFound`] for an unknown id.
    pub fn update_alert(
        &self,
        id: Uuid,
        symbol: &str,
        condition: AlertCondition,
        threshold: Decimal,
    ) -> Result<(), MonitorError> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(MonitorError::AlertNotFound(id))?;
        alert.update(symbol, condition, threshold);
        tracing::debug!(alert_id = %id, condition = condition.as_str(), "Alert updated");
        Ok(())
    }

    /// Re-arm a triggered alert.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlertNotFound`] for an unknown id.
    pub fn reset_alert(&self, id: Uuid) -> Result<(), MonitorError> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(MonitorError::AlertNotFound(id))?;
        alert.triggered = false;
        Ok(())
    }

    /// Copy of the alerts, in insertion order.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    // =========================================================================
    // Views
    // =========================================================================

    fn calculator(&self) -> PortfolioCalculator {
        PortfolioCalculator::new(self.settings.read().sell_watching)
    }

    /// Portfolio totals against the current quotes.
    #[must_use]
    pub fn summary(&self) -> PortfolioSummary {
        let quotes = self.store.snapshot();
        self.calculator().summary(&self.portfolio.read(), &quotes)
    }

    /// Display rows against the current quotes.
    #[must_use]
    pub fn rows(&self) -> Vec<PositionRow> {
        let quotes = self.store.snapshot();
        self.calculator().rows(&self.portfolio.read(), &quotes)
    }

    /// Holding statistics against the current quotes.
    #[must_use]
    pub fn stats(&self) -> PortfolioStats {
        let quotes = self.store.snapshot();
        PortfolioStats::compute(&self.portfolio.read(), &quotes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::{
        MockEventSink, MockQuoteSnapshotSource, MockStreamControl, SystemClock,
    };
    use crate::domain::market::MainQuote;

    fn monitor_with(stream: MockStreamControl) -> Monitor {
        let mut events = MockEventSink::new();
        events.expect_quotes_applied().return_const(());
        events.expect_status_changed().return_const(());
        events.expect_alert_triggered().return_const(());
        let deps = SchedulerDeps {
            stream: Arc::new(stream),
            snapshots: Arc::new(MockQuoteSnapshotSource::new()),
            clock: Arc::new(SystemClock),
            events: Arc::new(events),
        };
        Monitor::new(
            deps,
            MonitorOptions::default(),
            MonitorSettings {
                stream_url: "wss://public".to_string(),
                ..MonitorSettings::default()
            },
            CancellationToken::new(),
        )
    }

    fn idle_stream() -> MockStreamControl {
        let mut stream = MockStreamControl::new();
        stream.expect_set_subscriptions().return_const(());
        stream
    }

    #[test]
    fn portfolio_changes_update_subscriptions() {
        let mut stream = MockStreamControl::new();
        let mut seq = mockall::Sequence::new();
        stream
            .expect_set_subscriptions()
            .withf(|symbols, _| symbols == &vec!["MBB".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        stream
            .expect_set_subscriptions()
            .withf(|symbols, _| symbols == &vec!["MBB".to_string(), "FPT".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let monitor = monitor_with(stream);

        assert!(monitor.add_following("mbb").unwrap());
        assert!(!monitor.add_following("MBB").unwrap());
        monitor.add_holding("fpt", 100).unwrap();
    }

    #[test]
    fn invalid_orders_are_rejected() {
        let monitor = monitor_with(idle_stream());
        assert_eq!(
            monitor.add_order(OrderSide::Buy, "MBB", 0, dec!(21), None),
            Err(MonitorError::Portfolio(PortfolioError::ZeroQuantity))
        );
        assert!(matches!(
            monitor.update_order(OrderSide::Sell, 3, "MBB", 10, dec!(21), None),
            Err(MonitorError::Portfolio(PortfolioError::OrderLineOutOfRange { index: 3, len: 0 }))
        ));
    }

    #[test]
    fn orders_use_side_default_fees_and_merge() {
        let monitor = monitor_with(idle_stream());
        let first = monitor
            .add_order(OrderSide::Buy, "MBB", 1000, dec!(21), None)
            .unwrap();
        let second = monitor
            .add_order(OrderSide::Buy, "MBB", 1000, dec!(22), None)
            .unwrap();
        let third = monitor
            .add_order(OrderSide::Buy, "MBB", 500, dec!(22), Some(dec!(0.0015)))
            .unwrap();

        assert_eq!((first, second, third), (0, 0, 1));
        let portfolio = monitor.portfolio();
        let lines = portfolio.orders(OrderSide::Buy);
        assert_eq!(lines[0].quantity, 2000);
        assert_eq!(lines[0].price, dec!(21.5));
        assert_eq!(lines[0].fee_rate, dec!(0.0003));
        assert_eq!(monitor.remove_orders(OrderSide::Buy, "mbb"), 2);
    }

    #[test]
    fn alerts_can_be_reset_and_removed() {
        let monitor = monitor_with(idle_stream());
        let id = monitor.add_alert("vcb", AlertCondition::Below, dec!(90000));
        assert_eq!(monitor.alerts()[0].symbol, "VCB");

        assert!(monitor.reset_alert(id).is_ok());
        assert!(monitor.remove_alert(id));
        assert_eq!(monitor.reset_alert(id), Err(MonitorError::AlertNotFound(id)));
    }

    #[test]
    fn updating_an_alert_rearms_it() {
        let monitor = monitor_with(idle_stream());
        let id = monitor.add_alert("VCB", AlertCondition::Below, dec!(90000));
        monitor.alerts.lock()[0].triggered = true;

        monitor
            .update_alert(id, "VCB", AlertCondition::Below, dec!(90000))
            .unwrap();
        assert!(monitor.alerts()[0].triggered);

        monitor
            .update_alert(id, " fpt ", AlertCondition::Above, dec!(125000))
            .unwrap();
        let alert = &monitor.alerts()[0];
        assert_eq!(alert.id, id);
        assert_eq!(alert.symbol, "FPT");
        assert_eq!(alert.condition, AlertCondition::Above);
        assert_eq!(alert.threshold, dec!(125000));
        assert!(!alert.triggered);

        let unknown = Uuid::new_v4();
        assert_eq!(
            monitor.update_alert(unknown, "FPT", AlertCondition::Above, dec!(1)),
            Err(MonitorError::AlertNotFound(unknown))
        );
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let monitor = monitor_with(idle_stream());
        let (_tx, rx) = mpsc::channel(1);
        let (_tx2, rx2) = mpsc::channel(1);
        let handles = monitor.start(rx).unwrap();
        assert_eq!(handles.len(), 4);
        assert_eq!(monitor.start(rx2).unwrap_err(), MonitorError::AlreadyStarted);
        monitor.shutdown.cancel();
    }

    #[test]
    fn views_read_the_store() {
        let monitor = monitor_with(idle_stream());
        monitor.add_holding("MBB", 1000).unwrap();
        let quote = MainQuote {
            reference: dec!(21000),
            last_price: dec!(21500),
            ..MainQuote::empty("MBB")
        };
        monitor
            .store()
            .merge(HashMap::from([("MBB".to_string(), Quote::Main(quote))]));

        assert!(monitor.quote("mbb").is_some());
        assert_eq!(monitor.summary().total_diff, dec!(500000));
        assert_eq!(monitor.rows()[0].diff, Some(dec!(500000)));
        assert_eq!(monitor.stats().total_positions, 1);
    }
}
