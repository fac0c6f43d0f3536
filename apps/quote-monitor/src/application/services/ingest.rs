//! Quote Ingestion
//!
//! The single writer of the quote store. Coalesced stream batches and REST
//! snapshots arrive on one channel and are merged in arrival order, so the
//! store never sees concurrent writes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::EventSink;
use crate::domain::market::{DataSource, QuoteBatch, QuoteStore};
use crate::infrastructure::metrics;

/// A batch waiting to be merged.
#[derive(Debug, Clone)]
pub struct IngestBatch {
    /// Source that produced it.
    pub source: DataSource,
    /// Quotes by symbol.
    pub quotes: QuoteBatch,
}

impl IngestBatch {
    /// Batch from `source`.
    #[must_use]
    pub const fn new(source: DataSource, quotes: QuoteBatch) -> Self {
        Self { source, quotes }
    }
}

/// Merges batches into the store and announces them.
pub struct QuoteWriter {
    store: Arc<QuoteStore>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for QuoteWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteWriter")
            .field("quotes", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl QuoteWriter {
    /// Writer for `store`.
    #[must_use]
    pub fn new(store: Arc<QuoteStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Merge one batch. Returns the number of quotes written.
    pub fn apply(&self, batch: IngestBatch) -> usize {
        let IngestBatch { source, quotes } = batch;
        if quotes.is_empty() {
            return 0;
        }
        let announced = Arc::new(quotes.clone());
        let written = self.store.merge(quotes);
        if written > 0 {
            metrics::record_batch_flushed(source);
            metrics::set_quotes_stored(self.store.len());
            self.events.quotes_applied(source, announced);
            tracing::trace!(source = source.as_str(), written, "Quote batch merged");
        }
        written
    }

    /// Merge batches until the channel closes or `shutdown` fires.
    pub async fn run(self, mut input: mpsc::Receiver<IngestBatch>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                batch = input.recv() => match batch {
                    Some(batch) => {
                        self.apply(batch);
                    }
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::application::ports::MockEventSink;
    use crate::domain::market::{MainQuote, Quote};

    fn batch(symbols: &[&str]) -> QuoteBatch {
        symbols
            .iter()
            .map(|s| ((*s).to_string(), Quote::Main(MainQuote::empty(*s))))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn apply_merges_and_announces() {
        let store = Arc::new(QuoteStore::new());
        let mut events = MockEventSink::new();
        events
            .expect_quotes_applied()
            .withf(|source, quotes| *source == DataSource::Polling && quotes.len() == 2)
            .times(1)
            .return_const(());

        let writer = QuoteWriter::new(Arc::clone(&store), Arc::new(events));
        let written = writer.apply(IngestBatch::new(DataSource::Polling, batch(&["MBB", "FPT"])));

        assert_eq!(written, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn empty_batches_are_not_announced() {
        let store = Arc::new(QuoteStore::new());
        let mut events = MockEventSink::new();
        events.expect_quotes_applied().times(0);

        let writer = QuoteWriter::new(Arc::clone(&store), Arc::new(events));
        assert_eq!(writer.apply(IngestBatch::new(DataSource::Stream, QuoteBatch::new())), 0);
        assert_eq!(store.merge_count(), 0);
    }

    #[tokio::test]
    async fn run_drains_channel_in_order() {
        let store = Arc::new(QuoteStore::new());
        let mut events = MockEventSink::new();
        events.expect_quotes_applied().times(2).return_const(());

        let (tx, rx) = mpsc::channel(4);
        tx.send(IngestBatch::new(DataSource::Stream, batch(&["MBB"])))
            .await
            .unwrap();
        tx.send(IngestBatch::new(DataSource::Polling, batch(&["VCB"])))
            .await
            .unwrap();
        drop(tx);

        QuoteWriter::new(Arc::clone(&store), Arc::new(events))
            .run(rx, CancellationToken::new())
            .await;

        assert_eq!(store.len(), 2);
        assert_eq!(store.merge_count(), 2);
    }
}
