//! Data Source Scheduler
//!
//! Decides whether the store is fed by the stream or by REST polling, and
//! makes sure only one of them runs at a time. The decision is re-evaluated
//! on a fixed tick and whenever the source settings change:
//!
//! - weekday trading hours, outside lunch: stream
//! - lunch break, market closed, weekends: REST polling
//! - custom source: always stream
//!
//! Switching stops the previous source before starting the next. A REST
//! request already in flight is allowed to finish and its result is still
//! merged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ingest::IngestBatch;
use crate::application::ports::{Clock, EventSink, QuoteSnapshotSource, StreamControl};
use crate::domain::market::session::{is_lunch_break, poll_interval, preferred_source};
use crate::domain::market::{ConnectionStatus, DataSource, TradingCalendar};
use crate::infrastructure::metrics;

/// Status detail while polling over the lunch break.
pub const LUNCH_POLLING_DETAIL: &str = "lunch break, polling REST";

/// Status detail while polling outside trading hours.
pub const CLOSED_POLLING_DETAIL: &str = "market closed, polling REST";

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Poll period outside trading hours.
    pub poll_interval: Duration,
    /// Poll period during the lunch break.
    pub lunch_poll_interval: Duration,
    /// Period of the source re-evaluation.
    pub check_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            lunch_poll_interval: Duration::from_secs(30),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// What the active source should deliver, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTarget {
    /// Public stream URL.
    pub stream_url: String,
    /// Self-hosted stream URL.
    pub custom_source_url: String,
    /// Stream from the custom source around the clock.
    pub use_custom_source: bool,
    /// Symbols of interest, upper-case.
    pub symbols: Vec<String>,
    /// Whether index quotes are wanted.
    pub include_indices: bool,
}

impl SourceTarget {
    /// URL the stream should connect to.
    #[must_use]
    pub fn active_url(&self) -> &str {
        if self.use_custom_source {
            &self.custom_source_url
        } else {
            &self.stream_url
        }
    }
}

/// Collaborators of the scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
    /// Streaming connection.
    pub stream: Arc<dyn StreamControl>,
    /// REST snapshots.
    pub snapshots: Arc<dyn QuoteSnapshotSource>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Status fan-out.
    pub events: Arc<dyn EventSink>,
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Default)]
struct ActiveSource {
    source: Option<DataSource>,
    poller: Option<CancellationToken>,
}

struct Inner {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    calendar: TradingCalendar,
    ingest: mpsc::Sender<IngestBatch>,
    shutdown: CancellationToken,
    target: RwLock<SourceTarget>,
    active: Mutex<ActiveSource>,
}

/// Keeps exactly one data source running. Cheap to clone.
#[derive(Clone)]
pub struct DataSourceScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataSourceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceScheduler")
            .field("active", &self.active_source())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DataSourceScheduler {
    /// Create a scheduler. Polled snapshots are sent on `ingest`; polling
    /// stops when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        deps: SchedulerDeps,
        config: SchedulerConfig,
        calendar: TradingCalendar,
        target: SourceTarget,
        ingest: mpsc::Sender<IngestBatch>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                config,
                calendar,
                ingest,
                shutdown,
                target: RwLock::new(target),
                active: Mutex::new(ActiveSource::default()),
            }),
        }
    }

    /// Source currently running, if any.
    #[must_use]
    pub fn active_source(&self) -> Option<DataSource> {
        self.inner.active.lock().source
    }

    /// Current target.
    #[must_use]
    pub fn target(&self) -> SourceTarget {
        self.inner.target.read().clone()
    }

    /// Source the clock calls for right now.
    #[must_use]
    pub fn desired_source(&self) -> DataSource {
        let custom = self.inner.target.read().use_custom_source;
        preferred_source(self.inner.local_now(), custom)
    }

    /// Start or switch sources so the active one matches the clock.
    /// Returns the active source.
    pub fn reconcile(&self) -> DataSource {
        self.inner.reconcile()
    }

    /// Replace the target. Symbol changes are pushed to the stream; URL or
    /// custom-source changes restart streaming and re-run the decision.
    pub fn update_target(&self, target: SourceTarget) {
        let previous = std::mem::replace(&mut *self.inner.target.write(), target.clone());

        if previous.symbols != target.symbols || previous.include_indices != target.include_indices
        {
            self.inner
                .deps
                .stream
                .set_subscriptions(target.symbols.clone(), target.include_indices);
        }

        let url_changed = previous.active_url() != target.active_url();
        if previous.use_custom_source == target.use_custom_source && !url_changed {
            return;
        }

        if url_changed && self.active_source() == Some(DataSource::Stream) {
            tracing::info!(url = target.active_url(), "Stream source changed, reconnecting");
            self.inner.deps.stream.connect(target.active_url());
        }
        self.reconcile();
    }

    /// Fetch a snapshot right away when polling, outside the regular cadence.
    pub fn poll_now(&self) {
        if self.active_source() != Some(DataSource::Polling) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.poll_once().await;
        });
    }

    /// Stop whichever source is running.
    pub fn stop(&self) {
        let mut active = self.inner.active.lock();
        self.inner.stop_locked(&mut active);
        metrics::set_active_source(None);
    }

    /// Re-evaluate the source on every tick until shutdown, then stop.
    pub async fn run(&self) {
        let mut tick = tokio::time::interval(self.inner.config.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => {
                    self.stop();
                    tracing::info!("Data source scheduler stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.reconcile();
                }
            }
        }
    }
}

impl Inner {
    fn local_now(&self) -> chrono::NaiveDateTime {
        self.calendar.local(self.deps.clock.now())
    }

    fn reconcile(self: &Arc<Self>) -> DataSource {
        let target = self.target.read().clone();
        let now = self.local_now();
        let desired = preferred_source(now, target.use_custom_source);

        let mut active = self.active.lock();
        if active.source == Some(desired) {
            return desired;
        }

        tracing::info!(
            from = active.source.map_or("none", |s| s.as_str()),
            to = desired.as_str(),
            "Switching data source"
        );
        self.stop_locked(&mut active);

        match desired {
            DataSource::Stream => {
                self.deps
                    .stream
                    .set_subscriptions(target.symbols.clone(), target.include_indices);
                self.deps.stream.connect(target.active_url());
            }
            DataSource::Polling => {
                let detail = if is_lunch_break(now, target.use_custom_source) {
                    LUNCH_POLLING_DETAIL
                } else {
                    CLOSED_POLLING_DETAIL
                };
                self.deps
                    .events
                    .status_changed(ConnectionStatus::Disconnected, detail.to_string());

                let token = self.shutdown.child_token();
                let inner = Arc::clone(self);
                let poller = token.clone();
                tokio::spawn(async move {
                    inner.poll_loop(poller).await;
                });
                active.poller = Some(token);
            }
        }

        active.source = Some(desired);
        metrics::set_active_source(Some(desired));
        desired
    }

    fn stop_locked(&self, active: &mut ActiveSource) {
        match active.source.take() {
            Some(DataSource::Stream) => self.deps.stream.disconnect(),
            Some(DataSource::Polling) => {
                if let Some(poller) = active.poller.take() {
                    poller.cancel();
                }
            }
            None => {}
        }
    }

    async fn poll_once(&self) {
        let target = self.target.read().clone();
        if target.symbols.is_empty() && !target.include_indices {
            return;
        }
        let quotes = self
            .deps
            .snapshots
            .fetch_all(&target.symbols, target.include_indices)
            .await;
        if quotes.is_empty() {
            return;
        }
        if self
            .ingest
            .send(IngestBatch::new(DataSource::Polling, quotes))
            .await
            .is_err()
        {
            tracing::debug!("Ingest channel closed, snapshot discarded");
        }
    }

    async fn poll_loop(&self, token: CancellationToken) {
        tracing::info!("REST polling started");
        loop {
            self.poll_once().await;

            let custom = self.target.read().use_custom_source;
            let interval = poll_interval(
                self.local_now(),
                custom,
                self.config.poll_interval,
                self.config.lunch_poll_interval,
            );
            tracing::debug!(interval_secs = interval.as_secs(), "Next REST poll scheduled");

            tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::info!("REST polling stopped");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::application::ports::{MockQuoteSnapshotSource, MockStreamControl};
    use crate::domain::alert::AlertNotification;
    use crate::domain::market::{MainQuote, Quote, QuoteBatch};

    struct FakeClock(Mutex<DateTime<Utc>>);

    impl FakeClock {
        /// Exchange-local wall time on Tuesday 2024-06-04 (UTC+7).
        fn at(hour: u32, minute: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(local(hour, minute))))
        }

        fn set(&self, hour: u32, minute: u32) {
            *self.0.lock() = local(hour, minute);
        }
    }

    fn local(hour: u32, minute: u32) -> DateTime<Utc> {
        chrono::FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 4, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    #[derive(Default)]
    struct RecordingStream {
        calls: Mutex<Vec<String>>,
        connected: AtomicBool,
    }

    impl RecordingStream {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl StreamControl for RecordingStream {
        fn connect(&self, url: &str) {
            self.connected.store(true, Ordering::SeqCst);
            self.calls.lock().push(format!("connect {url}"));
        }

        fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.calls.lock().push("disconnect".to_string());
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn set_subscriptions(&self, symbols: Vec<String>, include_indices: bool) {
            self.calls
                .lock()
                .push(format!("subscribe {} {include_indices}", symbols.join(",")));
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(ConnectionStatus, String)>>);

    impl EventSink for RecordingSink {
        fn quotes_applied(&self, _source: DataSource, _quotes: Arc<QuoteBatch>) {}

        fn status_changed(&self, status: ConnectionStatus, detail: String) {
            self.0.lock().push((status, detail));
        }

        fn alert_triggered(&self, _notification: AlertNotification) {}
    }

    fn counting_snapshots(count: Arc<AtomicUsize>) -> MockQuoteSnapshotSource {
        let mut snapshots = MockQuoteSnapshotSource::new();
        snapshots.expect_fetch_all().returning(move |symbols, _| {
            count.fetch_add(1, Ordering::SeqCst);
            symbols
                .iter()
                .map(|s| (s.clone(), Quote::Main(MainQuote::empty(s.as_str()))))
                .collect()
        });
        snapshots
    }

    fn target() -> SourceTarget {
        SourceTarget {
            stream_url: "wss://public".to_string(),
            custom_source_url: "ws://custom".to_string(),
            use_custom_source: false,
            symbols: vec!["MBB".to_string()],
            include_indices: true,
        }
    }

    struct Harness {
        scheduler: DataSourceScheduler,
        stream: Arc<RecordingStream>,
        sink: Arc<RecordingSink>,
        clock: Arc<FakeClock>,
        fetches: Arc<AtomicUsize>,
        ingest: mpsc::Receiver<IngestBatch>,
    }

    fn harness(hour: u32, minute: u32, target: SourceTarget) -> Harness {
        let stream = Arc::new(RecordingStream::default());
        let sink = Arc::new(RecordingSink::default());
        let clock = FakeClock::at(hour, minute);
        let fetches = Arc::new(AtomicUsize::new(0));
        let (tx, ingest) = mpsc::channel(64);
        let deps = SchedulerDeps {
            stream: stream.clone(),
            snapshots: Arc::new(counting_snapshots(Arc::clone(&fetches))),
            clock: clock.clone(),
            events: sink.clone(),
        };
        let scheduler = DataSourceScheduler::new(
            deps,
            SchedulerConfig::default(),
            TradingCalendar::default(),
            target,
            tx,
            CancellationToken::new(),
        );
        Harness {
            scheduler,
            stream,
            sink,
            clock,
            fetches,
            ingest,
        }
    }

    #[tokio::test]
    async fn trading_hours_start_the_stream() {
        let mut stream = MockStreamControl::new();
        stream
            .expect_set_subscriptions()
            .withf(|symbols, indices| symbols == &vec!["MBB".to_string()] && *indices)
            .times(1)
            .return_const(());
        stream
            .expect_connect()
            .withf(|url| url == "wss://public")
            .times(1)
            .return_const(());

        let (tx, _rx) = mpsc::channel(1);
        let deps = SchedulerDeps {
            stream: Arc::new(stream),
            snapshots: Arc::new(MockQuoteSnapshotSource::new()),
            clock: FakeClock::at(10, 0),
            events: Arc::new(RecordingSink::default()),
        };
        let scheduler = DataSourceScheduler::new(
            deps,
            SchedulerConfig::default(),
            TradingCalendar::default(),
            target(),
            tx,
            CancellationToken::new(),
        );

        assert_eq!(scheduler.reconcile(), DataSource::Stream);
        // Second evaluation with the same decision is a no-op.
        assert_eq!(scheduler.reconcile(), DataSource::Stream);
    }

    #[tokio::test(start_paused = true)]
    async fn lunch_break_polls_every_thirty_seconds() {
        let mut h = harness(12, 0, target());

        assert_eq!(h.scheduler.reconcile(), DataSource::Polling);
        let first = h.ingest.recv().await.unwrap();
        assert_eq!(first.source, DataSource::Polling);
        assert!(first.quotes.contains_key("MBB"));

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
        assert!(h.stream.calls().is_empty());

        let statuses = h.sink.0.lock().clone();
        assert_eq!(
            statuses,
            vec![(ConnectionStatus::Disconnected, LUNCH_POLLING_DETAIL.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn after_close_polls_every_minute() {
        let h = harness(15, 0, target());

        assert_eq!(h.scheduler.reconcile(), DataSource::Polling);
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(h.sink.0.lock()[0].1, CLOSED_POLLING_DETAIL);
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_lunch_switches_to_stream_and_stops_polling() {
        let h = harness(12, 59, target());
        assert_eq!(h.scheduler.reconcile(), DataSource::Polling);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);

        h.clock.set(13, 1);
        assert_eq!(h.scheduler.reconcile(), DataSource::Stream);
        assert_eq!(
            h.stream.calls(),
            vec!["subscribe MBB true".to_string(), "connect wss://public".to_string()]
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn market_close_disconnects_the_stream() {
        let h = harness(14, 44, target());
        assert_eq!(h.scheduler.reconcile(), DataSource::Stream);

        h.clock.set(14, 45);
        assert_eq!(h.scheduler.reconcile(), DataSource::Polling);
        assert_eq!(h.stream.calls().last().unwrap(), "disconnect");
        assert!(!h.stream.is_connected());
    }

    #[tokio::test]
    async fn custom_source_streams_at_night() {
        let h = harness(
            22,
            0,
            SourceTarget {
                use_custom_source: true,
                ..target()
            },
        );
        assert_eq!(h.scheduler.reconcile(), DataSource::Stream);
        assert!(h.stream.calls().contains(&"connect ws://custom".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_custom_source_replaces_polling() {
        let h = harness(20, 0, target());
        assert_eq!(h.scheduler.reconcile(), DataSource::Polling);

        h.scheduler.update_target(SourceTarget {
            use_custom_source: true,
            ..target()
        });
        assert_eq!(h.scheduler.active_source(), Some(DataSource::Stream));
        assert_eq!(h.stream.calls().last().unwrap(), "connect ws://custom");
    }

    #[tokio::test]
    async fn symbol_changes_are_pushed_to_the_stream() {
        let h = harness(10, 0, target());
        h.scheduler.reconcile();

        h.scheduler.update_target(SourceTarget {
            symbols: vec!["MBB".to_string(), "FPT".to_string()],
            ..target()
        });
        assert_eq!(h.stream.calls().last().unwrap(), "subscribe MBB,FPT true");
        assert_eq!(h.stream.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_polling() {
        let h = harness(12, 0, target());
        h.scheduler.reconcile();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.scheduler.stop();
        assert_eq!(h.scheduler.active_source(), None);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }
}
