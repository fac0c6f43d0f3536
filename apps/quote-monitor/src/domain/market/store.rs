//! Quote Store
//!
//! The canonical "latest quote per symbol" map. Both ingestion paths write
//! here; every newer arrival for a symbol replaces the older one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{MainQuote, Quote};

/// A batch of quotes keyed by symbol.
pub type QuoteBatch = HashMap<String, Quote>;

/// Latest quote per symbol.
///
/// Writers are expected to be serialized by the caller (a single ingestion
/// task); the lock only protects concurrent readers.
#[derive(Debug, Default)]
pub struct QuoteStore {
    quotes: RwLock<HashMap<String, Quote>>,
    merges: AtomicU64,
}

impl QuoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite entries by symbol. Heartbeats are ignored.
    ///
    /// Returns the number of entries written.
    pub fn merge(&self, batch: QuoteBatch) -> usize {
        let mut quotes = self.quotes.write();
        let mut written = 0;
        for (symbol, quote) in batch {
            if matches!(quote, Quote::Heartbeat) {
                continue;
            }
            quotes.insert(symbol, quote);
            written += 1;
        }
        drop(quotes);
        if written > 0 {
            self.merges.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Latest main-board quote for `symbol`.
    #[must_use]
    pub fn main_quote(&self, symbol: &str) -> Option<MainQuote> {
        match self.quotes.read().get(symbol) {
            Some(Quote::Main(q)) => Some(q.clone()),
            _ => None,
        }
    }

    /// Copy of the whole map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Quote> {
        self.quotes.read().clone()
    }

    /// Number of symbols held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// True when nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Number of non-empty merges applied so far.
    #[must_use]
    pub fn merge_count(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::market::IndexQuote;

    fn main(symbol: &str, last: rust_decimal::Decimal) -> Quote {
        let mut q = MainQuote::empty(symbol);
        q.last_price = last;
        Quote::Main(q)
    }

    #[test]
    fn merge_overwrites_by_symbol() {
        let store = QuoteStore::new();
        store.merge(HashMap::from([("MBB".to_string(), main("MBB", dec!(21000)))]));
        store.merge(HashMap::from([("MBB".to_string(), main("MBB", dec!(21500)))]));

        assert_eq!(store.len(), 1);
        assert_eq!(store.main_quote("MBB").unwrap().last_price, dec!(21500));
        assert_eq!(store.merge_count(), 2);
    }

    #[test]
    fn merge_keeps_untouched_symbols() {
        let store = QuoteStore::new();
        store.merge(HashMap::from([
            ("MBB".to_string(), main("MBB", dec!(21000))),
            ("FPT".to_string(), main("FPT", dec!(95000))),
        ]));
        store.merge(HashMap::from([("FPT".to_string(), main("FPT", dec!(96000)))]));

        assert_eq!(store.main_quote("MBB").unwrap().last_price, dec!(21000));
        assert_eq!(store.main_quote("FPT").unwrap().last_price, dec!(96000));
    }

    #[test]
    fn heartbeats_are_not_stored() {
        let store = QuoteStore::new();
        let written = store.merge(HashMap::from([("__TICK__".to_string(), Quote::Heartbeat)]));
        assert_eq!(written, 0);
        assert!(store.is_empty());
        assert_eq!(store.merge_count(), 0);
    }

    #[test]
    fn main_quote_skips_index_entries() {
        let store = QuoteStore::new();
        store.merge(HashMap::from([(
            "VNINDEX".to_string(),
            Quote::Index(IndexQuote {
                symbol: "VNINDEX".to_string(),
                last_price: dec!(1250.5),
                total_volume: 0,
                change: dec!(3.2),
                change_percent: dec!(0.26),
            }),
        )]));
        assert!(store.get("VNINDEX").is_some());
        assert!(store.main_quote("VNINDEX").is_none());
    }
}
