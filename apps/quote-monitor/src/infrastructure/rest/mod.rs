//! REST Quote Snapshots
//!
//! One-shot quote fetches from the historical-quote HTTP API, used while the
//! stream is down (lunch break, outside trading hours). Symbols are fetched
//! in batches of bounded concurrency with a short pause between batches;
//! a failure for one symbol never fails the batch.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use crate::application::ports::QuoteSnapshotSource;
use crate::domain::market::{
    BOOK_DEPTH, IndexQuote, MainQuote, Quote, QuoteBatch, TRACKED_INDICES, TradingCalendar,
};
use crate::infrastructure::config::RestSettings;
use crate::infrastructure::metrics::{self, FetchOutcome};

/// Board reported for REST-sourced quotes.
pub const REST_BOARD: &str = "MAIN";

/// Book levels the REST payload carries.
const REST_BOOK_LEVELS: usize = 3;

/// `status` value of a successful response body.
const BODY_STATUS_OK: u16 = 200;

// =============================================================================
// Errors
// =============================================================================

/// REST fetch failure for one symbol.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Transport failure or undecodable body.
    #[error("request for {symbol} failed: {source}")]
    Http {
        /// Requested symbol.
        symbol: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx HTTP status.
    #[error("HTTP {status} for {symbol}")]
    Status {
        /// Requested symbol.
        symbol: String,
        /// HTTP status code.
        status: u16,
    },

    /// Body status other than 200 or no data.
    #[error("no data for {symbol} (body status {status:?})")]
    NoData {
        /// Requested symbol.
        symbol: String,
        /// `status` field of the body, if any.
        status: Option<u16>,
    },
}

impl RestError {
    const fn outcome(&self) -> FetchOutcome {
        match self {
            Self::Client(_) | Self::Http { .. } | Self::Status { .. } => FetchOutcome::Failed,
            Self::NoData { .. } => FetchOutcome::Invalid,
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    data: Option<QuotePayload>,
}

/// Quote fields of the response body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotePayload {
    price_close: Option<Decimal>,
    price_reference: Option<Decimal>,
    price_high: Option<Decimal>,
    price_low: Option<Decimal>,
    price_average: Option<Decimal>,
    price_ceiling: Option<Decimal>,
    price_floor: Option<Decimal>,
    price_open: Option<Decimal>,
    net_change: Option<Decimal>,
    pct_change: Option<Decimal>,
    total_volume: Option<Decimal>,
    total_value: Option<Decimal>,
    quantity_bid1: Option<Decimal>,
    quantity_bid2: Option<Decimal>,
    quantity_bid3: Option<Decimal>,
    quantity_ask1: Option<Decimal>,
    quantity_ask2: Option<Decimal>,
    quantity_ask3: Option<Decimal>,
    timestamp: Option<Decimal>,
}

fn whole(value: Option<Decimal>) -> i64 {
    value.and_then(|v| v.trunc().to_i64()).unwrap_or(0)
}

fn book(levels: [Option<Decimal>; REST_BOOK_LEVELS]) -> [i64; BOOK_DEPTH] {
    let mut volumes = [0; BOOK_DEPTH];
    for (slot, level) in volumes.iter_mut().zip(levels) {
        *slot = whole(level);
    }
    volumes
}

impl QuotePayload {
    fn change(&self) -> Decimal {
        self.net_change.unwrap_or_else(|| {
            self.price_close.unwrap_or_default() - self.price_reference.unwrap_or_default()
        })
    }

    fn change_percent(&self) -> Decimal {
        if let Some(pct) = self.pct_change {
            return pct;
        }
        let reference = self.price_reference.unwrap_or_default();
        if reference > Decimal::ZERO {
            self.change() / reference * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }

    fn into_main_quote(self, symbol: &str, calendar: TradingCalendar) -> MainQuote {
        let update_time = self
            .timestamp
            .and_then(|ts| ts.trunc().to_i64())
            .and_then(|secs| calendar.time_of_secs(secs))
            .unwrap_or_else(|| calendar.local(Utc::now()).time());

        MainQuote {
            symbol: symbol.to_string(),
            board: REST_BOARD.to_string(),
            bid_volumes: book([self.quantity_bid1, self.quantity_bid2, self.quantity_bid3]),
            ask_volumes: book([self.quantity_ask1, self.quantity_ask2, self.quantity_ask3]),
            last_price: self.price_close.unwrap_or_default(),
            last_volume: whole(self.total_volume),
            high: self.price_high.unwrap_or_default(),
            low: self.price_low.unwrap_or_default(),
            average: self.price_average.unwrap_or_default(),
            ceiling: self.price_ceiling.unwrap_or_default(),
            floor: self.price_floor.unwrap_or_default(),
            reference: self.price_reference.unwrap_or_default(),
            open: self.price_open.unwrap_or_default(),
            ato_atc: Decimal::ZERO,
            update_time,
        }
    }

    fn into_index_quote(self, symbol: &str) -> IndexQuote {
        IndexQuote {
            symbol: symbol.to_string(),
            last_price: self.price_close.unwrap_or_default(),
            total_volume: whole(self.total_value),
            change: self.change(),
            change_percent: self.change_percent(),
        }
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// REST snapshot client.
#[derive(Debug, Clone)]
pub struct RestFetcher {
    client: reqwest::Client,
    base_url: String,
    max_concurrency: usize,
    batch_pause: Duration,
    calendar: TradingCalendar,
}

impl RestFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &RestSettings, calendar: TradingCalendar) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(RestError::Client)?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_concurrency: settings.max_concurrency.max(1),
            batch_pause: settings.batch_pause,
            calendar,
        })
    }

    async fn fetch_payload(&self, symbol: &str, index: bool) -> Result<QuotePayload, RestError> {
        let url = if index {
            format!("{}/{symbol}?type=index", self.base_url)
        } else {
            format!("{}/{symbol}", self.base_url)
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| RestError::Http {
                symbol: symbol.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RestError::Status {
                symbol: symbol.to_string(),
                status: response.status().as_u16(),
            });
        }

        let envelope: Envelope = response.json().await.map_err(|source| RestError::Http {
            symbol: symbol.to_string(),
            source,
        })?;

        match envelope {
            Envelope {
                status: Some(BODY_STATUS_OK),
                data: Some(data),
            } => Ok(data),
            Envelope { status, .. } => Err(RestError::NoData {
                symbol: symbol.to_string(),
                status,
            }),
        }
    }

    /// Fetch one equity quote.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or a body
    /// without data.
    pub async fn fetch_symbol(&self, symbol: &str) -> Result<MainQuote, RestError> {
        let symbol = symbol.to_uppercase();
        let payload = self.fetch_payload(&symbol, false).await?;
        Ok(payload.into_main_quote(&symbol, self.calendar))
    }

    /// Fetch one index quote.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or a body
    /// without data.
    pub async fn fetch_index(&self, symbol: &str) -> Result<IndexQuote, RestError> {
        let symbol = symbol.to_uppercase();
        let payload = self.fetch_payload(&symbol, true).await?;
        Ok(payload.into_index_quote(&symbol))
    }

    fn record<T>(result: Result<T, RestError>) -> Option<T> {
        match result {
            Ok(value) => {
                metrics::record_rest_fetch(FetchOutcome::Success);
                Some(value)
            }
            Err(e) => {
                metrics::record_rest_fetch(e.outcome());
                tracing::warn!(error = %e, "REST quote fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl QuoteSnapshotSource for RestFetcher {
    async fn fetch_all(&self, symbols: &[String], include_indices: bool) -> QuoteBatch {
        let started = Instant::now();
        let mut batch = QuoteBatch::new();

        let chunks: Vec<&[String]> = symbols.chunks(self.max_concurrency).collect();
        let last_chunk = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let results =
                futures::future::join_all(chunk.iter().map(|s| self.fetch_symbol(s))).await;
            for quote in results.into_iter().filter_map(Self::record) {
                batch.insert(quote.symbol.clone(), Quote::Main(quote));
            }
            if i < last_chunk && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        if include_indices {
            for index in TRACKED_INDICES {
                if let Some(quote) = Self::record(self.fetch_index(index).await) {
                    batch.insert(quote.symbol.clone(), Quote::Index(quote));
                }
            }
        }

        metrics::record_rest_cycle(started.elapsed());
        tracing::debug!(
            requested = symbols.len(),
            received = batch.len(),
            "REST snapshot complete"
        );
        batch
    }
}
