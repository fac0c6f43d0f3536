//! Market Quote Types
//!
//! Canonical, source-agnostic representation of the quotes delivered by the
//! streaming feed and the REST fallback. Prices are kept in raw exchange
//! units (one unit = 0.001 currency unit); consumers divide by
//! [`PRICE_SCALE`] to obtain display prices.

pub mod session;
pub mod status;
pub mod store;

use chrono::{NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use session::{DataSource, TradingCalendar};
pub use status::{ConnectionStatus, StatusUpdate};
pub use store::{QuoteBatch, QuoteStore};

/// Divisor between raw exchange prices and display prices.
pub const PRICE_SCALE: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Number of order book levels carried per side.
pub const BOOK_DEPTH: usize = 10;

/// Board code of the primary exchange whose closing auction rule applies.
pub const PRIMARY_BOARD: &str = "hose";

/// The two index symbols tracked alongside individual equities.
pub const TRACKED_INDICES: [&str; 2] = ["VNINDEX", "VN30"];

/// Start of the closing auction on the primary board (14:30 local).
const CLOSING_AUCTION_START: (u32, u32) = (14, 30);

// =============================================================================
// Quote
// =============================================================================

/// A decoded quote, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quote {
    /// Equity quote from the main board.
    Main(MainQuote),
    /// Market index quote.
    Index(IndexQuote),
    /// Liveness marker with no payload.
    Heartbeat,
}

impl Quote {
    /// Symbol this quote belongs to, `None` for heartbeats.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Main(q) => Some(&q.symbol),
            Self::Index(q) => Some(&q.symbol),
            Self::Heartbeat => None,
        }
    }

    /// Returns the main-board quote, if this is one.
    #[must_use]
    pub const fn as_main(&self) -> Option<&MainQuote> {
        match self {
            Self::Main(q) => Some(q),
            _ => None,
        }
    }

    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Main(_) => "main",
            Self::Index(_) => "index",
            Self::Heartbeat => "heartbeat",
        }
    }
}

// =============================================================================
// Main board quote
// =============================================================================

/// Equity quote from the main board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainQuote {
    /// Upper-case ticker.
    pub symbol: String,
    /// Board code as sent by the exchange.
    pub board: String,
    /// Bid sizes, best level first.
    pub bid_volumes: [i64; BOOK_DEPTH],
    /// Ask sizes, best level first.
    pub ask_volumes: [i64; BOOK_DEPTH],
    /// Last trade price (raw units).
    pub last_price: Decimal,
    /// Last trade volume.
    pub last_volume: i64,
    /// Session high (raw units).
    pub high: Decimal,
    /// Session low (raw units).
    pub low: Decimal,
    /// Session average (raw units).
    pub average: Decimal,
    /// Daily upper limit (raw units).
    pub ceiling: Decimal,
    /// Daily lower limit (raw units).
    pub floor: Decimal,
    /// Prior session close (raw units).
    pub reference: Decimal,
    /// Opening price (raw units).
    pub open: Decimal,
    /// Opening/closing auction price (raw units).
    pub ato_atc: Decimal,
    /// Exchange-local wall clock time of the last update.
    pub update_time: NaiveTime,
}

impl MainQuote {
    /// Empty quote for `symbol`, every numeric field zero.
    #[must_use]
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            board: String::new(),
            bid_volumes: [0; BOOK_DEPTH],
            ask_volumes: [0; BOOK_DEPTH],
            last_price: Decimal::ZERO,
            last_volume: 0,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            average: Decimal::ZERO,
            ceiling: Decimal::ZERO,
            floor: Decimal::ZERO,
            reference: Decimal::ZERO,
            open: Decimal::ZERO,
            ato_atc: Decimal::ZERO,
            update_time: NaiveTime::MIN,
        }
    }

    /// Tradable price in display units.
    ///
    /// On the primary board at or after 14:30 the auction price wins, even
    /// when it is still zero. Otherwise the last trade is used, falling back
    /// to the auction price and then the reference price.
    #[must_use]
    pub fn current_price(&self) -> Decimal {
        if self.in_closing_auction() {
            return self.ato_atc / PRICE_SCALE;
        }

        let raw = if !self.last_price.is_zero() {
            self.last_price
        } else if !self.ato_atc.is_zero() {
            self.ato_atc
        } else {
            self.reference
        };
        raw / PRICE_SCALE
    }

    /// Reference price in display units.
    #[must_use]
    pub fn reference_price(&self) -> Decimal {
        self.reference / PRICE_SCALE
    }

    /// Percent change of the current price against the reference price.
    ///
    /// Zero when no reference is known.
    #[must_use]
    pub fn change_percent(&self) -> Decimal {
        let reference = self.reference_price();
        if reference.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price() - reference) / reference * Decimal::ONE_HUNDRED
    }

    /// Sum of the ten bid levels.
    #[must_use]
    pub fn total_bid_volume(&self) -> i64 {
        self.bid_volumes.iter().sum()
    }

    /// Sum of the ten ask levels.
    #[must_use]
    pub fn total_ask_volume(&self) -> i64 {
        self.ask_volumes.iter().sum()
    }

    /// Classify a display price and its signed change against this quote's
    /// daily limits.
    #[must_use]
    pub fn trend_of(&self, price: Decimal, change: Decimal) -> PriceTrend {
        PriceTrend::classify(price, change, self.ceiling, self.floor)
    }

    fn in_closing_auction(&self) -> bool {
        let (hour, minute) = CLOSING_AUCTION_START;
        self.board.eq_ignore_ascii_case(PRIMARY_BOARD)
            && (self.update_time.hour(), self.update_time.minute()) >= (hour, minute)
    }
}

// =============================================================================
// Index quote
// =============================================================================

/// Market index quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuote {
    /// Index symbol, e.g. `VNINDEX`.
    pub symbol: String,
    /// Last index level.
    pub last_price: Decimal,
    /// Total traded volume / value as published by the feed.
    pub total_volume: i64,
    /// Absolute change against the prior close.
    pub change: Decimal,
    /// Percent change against the prior close.
    pub change_percent: Decimal,
}

// =============================================================================
// Trend classification
// =============================================================================

/// Visual classification of a price relative to its basis and daily limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTrend {
    /// At or above the daily ceiling.
    Ceiling,
    /// At or below the daily floor.
    Floor,
    /// Above the basis.
    Up,
    /// Below the basis.
    Down,
    /// Equal to the basis.
    Unchanged,
}

impl PriceTrend {
    /// Classify `price` (display units) against the raw `ceiling` / `floor`
    /// limits, then by the sign of `change`. Zero limits are treated as
    /// unknown.
    #[must_use]
    pub fn classify(price: Decimal, change: Decimal, ceiling: Decimal, floor: Decimal) -> Self {
        let raw = price * PRICE_SCALE;
        if !ceiling.is_zero() && raw >= ceiling {
            return Self::Ceiling;
        }
        if !floor.is_zero() && raw <= floor {
            return Self::Floor;
        }
        match change.cmp(&Decimal::ZERO) {
            std::cmp::Ordering::Greater => Self::Up,
            std::cmp::Ordering::Less => Self::Down,
            std::cmp::Ordering::Equal => Self::Unchanged,
        }
    }

    /// Lower-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ceiling => "ceiling",
            Self::Floor => "floor",
            Self::Up => "up",
            Self::Down => "down",
            Self::Unchanged => "unchanged",
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn quote(board: &str, last: Decimal, ato: Decimal, reference: Decimal, at: (u32, u32)) -> MainQuote {
        MainQuote {
            board: board.to_string(),
            last_price: last,
            ato_atc: ato,
            reference,
            update_time: NaiveTime::from_hms_opt(at.0, at.1, 0).unwrap(),
            ..MainQuote::empty("MBB")
        }
    }

    #[test]
    fn price_scale_is_one_thousand() {
        assert_eq!(PRICE_SCALE, dec!(1000));
    }

    #[test_case("HOSE", dec!(21500), dec!(21700), (10, 0) => dec!(21.5); "last trade during session")]
    #[test_case("HOSE", dec!(21500), dec!(21700), (14, 30) => dec!(21.7); "auction price from 14:30")]
    #[test_case("hose", dec!(21500), dec!(0), (14, 45) => dec!(0); "auction price even when zero")]
    #[test_case("HNX", dec!(21500), dec!(21700), (14, 40) => dec!(21.5); "other boards ignore auction rule")]
    #[test_case("HOSE", dec!(0), dec!(21700), (9, 15) => dec!(21.7); "auction fallback when no trade")]
    #[test_case("HOSE", dec!(0), dec!(0), (9, 15) => dec!(25); "reference fallback")]
    fn current_price_resolution(board: &str, last: Decimal, ato: Decimal, at: (u32, u32)) -> Decimal {
        quote(board, last, ato, dec!(25000), at).current_price()
    }

    #[test]
    fn change_percent_against_reference() {
        let q = quote("HNX", dec!(22000), dec!(0), dec!(20000), (10, 0));
        assert_eq!(q.change_percent(), dec!(10));

        let no_ref = quote("HNX", dec!(22000), dec!(0), dec!(0), (10, 0));
        assert_eq!(no_ref.change_percent(), Decimal::ZERO);
    }

    #[test]
    fn volume_totals_sum_all_levels() {
        let mut q = MainQuote::empty("FPT");
        q.bid_volumes = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        q.ask_volumes[0] = 100;
        q.ask_volumes[9] = 5;
        assert_eq!(q.total_bid_volume(), 55);
        assert_eq!(q.total_ask_volume(), 105);
    }

    #[test_case(dec!(23.5), dec!(22) => PriceTrend::Ceiling; "at ceiling")]
    #[test_case(dec!(20.5), dec!(22) => PriceTrend::Floor; "at floor")]
    #[test_case(dec!(22.3), dec!(22) => PriceTrend::Up; "up")]
    #[test_case(dec!(21.7), dec!(22) => PriceTrend::Down; "down")]
    #[test_case(dec!(22), dec!(22) => PriceTrend::Unchanged; "flat")]
    fn trend_classification(price: Decimal, basis: Decimal) -> PriceTrend {
        PriceTrend::classify(price, price - basis, dec!(23500), dec!(20500))
    }

    #[test]
    fn quote_serializes_with_kind_tag() {
        let json = serde_json::to_value(Quote::Heartbeat).unwrap();
        assert_eq!(json["kind"], "heartbeat");

        let json = serde_json::to_value(Quote::Main(MainQuote::empty("VCB"))).unwrap();
        assert_eq!(json["kind"], "main");
        assert_eq!(json["symbol"], "VCB");
    }
}
