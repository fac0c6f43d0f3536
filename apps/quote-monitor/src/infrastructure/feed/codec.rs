//! Frame Codec
//!
//! Decodes the positional, pipe-delimited text frames of the quote stream
//! and encodes subscription requests.
//!
//! # Main-board frame
//!
//! `MAIN|S#<symbol>|...` with at least 102 fields:
//!
//! | Field        | Meaning                                  |
//! |--------------|------------------------------------------|
//! | 1            | symbol with a two-character prefix       |
//! | 3, 5 .. 21   | bid sizes, levels 1-10                   |
//! | 23, 25 .. 41 | ask sizes, levels 1-10                   |
//! | 42 / 43      | last trade price / volume                |
//! | 44 / 46 / 47 | high / low / average                     |
//! | 45           | board code                               |
//! | 59 / 60 / 61 | ceiling / floor / reference              |
//! | 75           | open                                     |
//! | 96           | opening / closing auction price          |
//! | 101          | update timestamp, epoch milliseconds     |
//!
//! # Index frame
//!
//! `I#<symbol>|...` with at least 19 fields: 1 = last, 10 = total volume,
//! 18 / 19 = absolute / percent change.
//!
//! Numeric fields never fail: empty or unparsable values decode as zero.

use std::str::FromStr;

use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::messages::{
    ACK_PREFIX, FIELD_DELIMITER, HEARTBEAT_MARKER, INDEX_FRAME_PREFIX, MAIN_FRAME_PREFIX,
    SubscriptionRequest,
};
use crate::domain::market::{BOOK_DEPTH, IndexQuote, MainQuote, Quote, TradingCalendar};

/// Minimum field count of a main-board frame.
pub const MAIN_MIN_FIELDS: usize = 102;

/// Minimum field count of an index frame.
pub const INDEX_MIN_FIELDS: usize = 19;

/// Frame decoding failures. Both are recoverable: the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Recognised frame with too few fields.
    #[error("malformed {kind} frame: {fields} fields, at least {required} required")]
    MalformedFrame {
        /// `main` or `index`.
        kind: &'static str,
        /// Fields present.
        fields: usize,
        /// Fields required.
        required: usize,
    },

    /// Frame of an unknown shape.
    #[error("unrecognized frame")]
    Unrecognized,
}

/// Encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse an integer field; empty or invalid input is zero. Decimal input is
/// truncated towards zero.
#[must_use]
pub fn parse_long(field: Option<&str>) -> i64 {
    let Some(text) = field.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0;
    };
    text.parse::<i64>()
        .ok()
        .or_else(|| Decimal::from_str(text).ok().and_then(|d| d.trunc().to_i64()))
        .unwrap_or(0)
}

/// Parse a decimal field; empty or invalid input is zero.
#[must_use]
pub fn parse_decimal(field: Option<&str>) -> Decimal {
    let Some(text) = field.map(str::trim).filter(|t| !t.is_empty()) else {
        return Decimal::ZERO;
    };
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .unwrap_or(Decimal::ZERO)
}

fn strip_prefix_chars(raw: &str, count: usize) -> String {
    if raw.chars().count() > count {
        raw.chars().skip(count).collect()
    } else {
        String::new()
    }
}

/// Codec for the quote stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec {
    calendar: TradingCalendar,
}

impl FrameCodec {
    /// Codec converting timestamps with `calendar`.
    #[must_use]
    pub const fn new(calendar: TradingCalendar) -> Self {
        Self { calendar }
    }

    /// True for the server's subscription acknowledgement.
    #[must_use]
    pub fn is_acknowledgement(raw: &str) -> bool {
        raw.starts_with(ACK_PREFIX)
    }

    /// Decode one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedFrame`] for a short main or index
    /// frame and [`ParseError::Unrecognized`] for anything else that is not
    /// a heartbeat.
    pub fn parse(&self, raw: &str) -> Result<Quote, ParseError> {
        if raw.starts_with(MAIN_FRAME_PREFIX) {
            self.parse_main(raw).map(Quote::Main)
        } else if raw.starts_with(INDEX_FRAME_PREFIX) {
            Self::parse_index(raw).map(Quote::Index)
        } else if raw.starts_with(HEARTBEAT_MARKER) {
            Ok(Quote::Heartbeat)
        } else {
            Err(ParseError::Unrecognized)
        }
    }

    fn parse_main(&self, raw: &str) -> Result<MainQuote, ParseError> {
        let parts: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
        if parts.len() < MAIN_MIN_FIELDS {
            return Err(ParseError::MalformedFrame {
                kind: "main",
                fields: parts.len(),
                required: MAIN_MIN_FIELDS,
            });
        }

        let field = |i: usize| parts.get(i).copied();
        let long = |i: usize| parse_long(field(i));
        let dec = |i: usize| parse_decimal(field(i));

        let bid_volumes: [i64; BOOK_DEPTH] = std::array::from_fn(|level| long(3 + level * 2));
        let ask_volumes: [i64; BOOK_DEPTH] = std::array::from_fn(|level| long(23 + level * 2));

        Ok(MainQuote {
            symbol: strip_prefix_chars(field(1).unwrap_or_default(), 2),
            board: field(45).unwrap_or_default().to_string(),
            bid_volumes,
            ask_volumes,
            last_price: dec(42),
            last_volume: long(43),
            high: dec(44),
            low: dec(46),
            average: dec(47),
            ceiling: dec(59),
            floor: dec(60),
            reference: dec(61),
            open: dec(75),
            ato_atc: dec(96),
            update_time: self.update_time(field(101)),
        })
    }

    fn parse_index(raw: &str) -> Result<IndexQuote, ParseError> {
        let parts: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
        if parts.len() < INDEX_MIN_FIELDS {
            return Err(ParseError::MalformedFrame {
                kind: "index",
                fields: parts.len(),
                required: INDEX_MIN_FIELDS,
            });
        }

        let field = |i: usize| parts.get(i).copied();
        let head = field(0).unwrap_or_default();
        let symbol = head.strip_prefix(INDEX_FRAME_PREFIX).unwrap_or(head);

        Ok(IndexQuote {
            symbol: symbol.to_string(),
            last_price: parse_decimal(field(1)),
            total_volume: parse_long(field(10)),
            change: parse_decimal(field(18)),
            change_percent: parse_decimal(field(19)),
        })
    }

    /// Exchange-local time of an epoch-millisecond field, or the current
    /// exchange-local time when the field is unusable.
    fn update_time(&self, field: Option<&str>) -> NaiveTime {
        field
            .map(str::trim)
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|millis| self.calendar.time_of_millis(millis))
            .unwrap_or_else(|| self.calendar.local(Utc::now()).time())
    }

    /// Encode a subscription request as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscription(&self, request: &SubscriptionRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}
