//! Update Coalescer
//!
//! Buffers streamed quotes per symbol and flushes them as one batch once the
//! stream has been quiet for the coalescing window. Each update restarts the
//! window; the latest quote per symbol wins. A pending batch is flushed no
//! later than `max_latency` after its first update so a busy stream still
//! reaches the store.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ingest::IngestBatch;
use crate::domain::market::{DataSource, Quote, QuoteBatch};

/// Coalescing timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerConfig {
    /// Quiet period that triggers a flush.
    pub window: Duration,
    /// Upper bound on how long a buffered quote may wait.
    pub max_latency: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self::with_window(Duration::from_millis(50))
    }
}

impl CoalescerConfig {
    /// Config for `window`, with the latency cap at twenty windows.
    #[must_use]
    pub const fn with_window(window: Duration) -> Self {
        Self {
            window,
            max_latency: window.saturating_mul(20),
        }
    }
}

/// Debouncing per-symbol buffer between the stream and the store writer.
#[derive(Debug)]
pub struct UpdateCoalescer {
    config: CoalescerConfig,
    pending: QuoteBatch,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl UpdateCoalescer {
    /// Empty coalescer.
    #[must_use]
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            pending: QuoteBatch::new(),
            first_at: None,
            last_at: None,
        }
    }

    /// Buffer a quote. Heartbeats are ignored.
    pub fn push(&mut self, quote: Quote) {
        let Some(symbol) = quote.symbol().map(str::to_string) else {
            return;
        };
        let now = Instant::now();
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);
        self.pending.insert(symbol, quote);
    }

    /// Symbols waiting to be flushed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When the pending batch is due, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let (first, last) = (self.first_at?, self.last_at?);
        Some((last + self.config.window).min(first + self.config.max_latency))
    }

    /// Take the pending batch, if any.
    pub fn flush(&mut self) -> Option<QuoteBatch> {
        self.first_at = None;
        self.last_at = None;
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Drive the coalescer until `input` closes or `shutdown` fires. Batches
    /// go to `output` tagged as stream batches. A closed input flushes what
    /// is pending; shutdown drops it.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<Quote>,
        output: mpsc::Sender<IngestBatch>,
        shutdown: CancellationToken,
    ) {
        loop {
            let deadline = self.deadline();
            let due = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!(dropped = self.pending_len(), "Coalescer stopped");
                    return;
                }
                () = due => {
                    if let Some(batch) = self.flush() {
                        tracing::trace!(symbols = batch.len(), "Flushing coalesced batch");
                        if output.send(IngestBatch::new(DataSource::Stream, batch)).await.is_err() {
                            return;
                        }
                    }
                }
                quote = input.recv() => match quote {
                    Some(quote) => self.push(quote),
                    None => {
                        if let Some(batch) = self.flush() {
                            let _ = output.send(IngestBatch::new(DataSource::Stream, batch)).await;
                        }
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::market::MainQuote;

    fn quote(symbol: &str, last: rust_decimal::Decimal) -> Quote {
        Quote::Main(MainQuote {
            last_price: last,
            ..MainQuote::empty(symbol)
        })
    }

    fn spawn(
        config: CoalescerConfig,
    ) -> (mpsc::Sender<Quote>, mpsc::Receiver<IngestBatch>, CancellationToken) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        tokio::spawn(UpdateCoalescer::new(config).run(in_rx, out_tx, shutdown.clone()));
        (in_tx, out_rx, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_updates_yields_one_batch_with_latest() {
        let (tx, mut rx, _shutdown) = spawn(CoalescerConfig::default());

        tx.send(quote("MBB", dec!(21000))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(quote("MBB", dec!(21100))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(quote("MBB", dec!(21200))).await.unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.source, DataSource::Stream);
        let batch = batch.quotes;
        assert_eq!(batch.len(), 1);
        let mbb = batch["MBB"].as_main().unwrap();
        assert_eq!(mbb.last_price, dec!(21200));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_flush_separately() {
        let (tx, mut rx, _shutdown) = spawn(CoalescerConfig::default());

        tx.send(quote("MBB", dec!(21000))).await.unwrap();
        let first = rx.recv().await.unwrap().quotes;
        tx.send(quote("FPT", dec!(98000))).await.unwrap();
        let second = rx.recv().await.unwrap().quotes;

        assert!(first.contains_key("MBB"));
        assert!(second.contains_key("FPT") && !second.contains_key("MBB"));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_stream_is_flushed_by_latency_cap() {
        let config = CoalescerConfig {
            window: Duration::from_millis(50),
            max_latency: Duration::from_millis(200),
        };
        let (tx, mut rx, _shutdown) = spawn(config);

        let start = Instant::now();
        let feeder = tokio::spawn(async move {
            for i in 0..20 {
                tx.send(quote("MBB", rust_decimal::Decimal::from(i))).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let batch = rx.recv().await.unwrap().quotes;
        assert!(start.elapsed() <= Duration::from_millis(210));
        assert_eq!(batch.len(), 1);
        feeder.await.unwrap();
    }

    #[test]
    fn heartbeats_are_not_buffered() {
        let mut coalescer = UpdateCoalescer::new(CoalescerConfig::default());
        coalescer.push(Quote::Heartbeat);
        assert_eq!(coalescer.pending_len(), 0);
        assert!(coalescer.deadline().is_none());
        assert!(coalescer.flush().is_none());
    }
}
