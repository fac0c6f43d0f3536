//! Price Alerts
//!
//! User-defined thresholds evaluated against the quote map. An alert fires
//! at most once: `triggered` stays set until the user resets it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::{PRICE_SCALE, Quote};

/// Condition an alert watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Current price at or above the threshold (currency units).
    Above,
    /// Current price at or below the threshold (currency units).
    Below,
    /// Percent change at or above the threshold.
    ChangeUp,
    /// Percent change at or below the negated threshold.
    ChangeDown,
}

impl AlertCondition {
    /// Parse a condition name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "above" => Some(Self::Above),
            "below" => Some(Self::Below),
            "change_up" | "changeup" => Some(Self::ChangeUp),
            "change_down" | "changedown" => Some(Self::ChangeDown),
            _ => None,
        }
    }

    /// Snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::ChangeUp => "change_up",
            Self::ChangeDown => "change_down",
        }
    }
}

/// A user alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identifier.
    pub id: Uuid,
    /// Upper-case ticker.
    pub symbol: String,
    /// What to watch for.
    pub condition: AlertCondition,
    /// Price in currency units for `above` / `below`, percent otherwise.
    pub threshold: Decimal,
    /// Set once the alert has fired.
    pub triggered: bool,
}

impl Alert {
    /// New, untriggered alert with a fresh id.
    #[must_use]
    pub fn new(symbol: &str, condition: AlertCondition, threshold: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.trim().to_uppercase(),
            condition,
            threshold,
            triggered: false,
        }
    }

    /// Replace what the alert watches. A changed symbol, condition or
    /// threshold re-arms it; an identical edit keeps the triggered flag.
    pub fn update(&mut self, symbol: &str, condition: AlertCondition, threshold: Decimal) {
        let symbol = symbol.trim().to_uppercase();
        if symbol != self.symbol || condition != self.condition || threshold != self.threshold {
            self.triggered = false;
        }
        self.symbol = symbol;
        self.condition = condition;
        self.threshold = threshold;
    }

    /// Check the alert against a quote map. Returns a message when the
    /// condition holds; triggered alerts and symbols without a main-board
    /// quote never match.
    #[must_use]
    pub fn check(&self, quotes: &HashMap<String, Quote>) -> Option<String> {
        if self.triggered {
            return None;
        }
        let quote = quotes.get(&self.symbol).and_then(Quote::as_main)?;
        let price = quote.current_price();
        let change = quote.change_percent();

        match self.condition {
            AlertCondition::Above if price >= self.threshold / PRICE_SCALE => Some(format!(
                "{} reached {} (>= {})",
                self.symbol,
                price.round_dp(2),
                self.threshold
            )),
            AlertCondition::Below if price <= self.threshold / PRICE_SCALE => Some(format!(
                "{} dropped to {} (<= {})",
                self.symbol,
                price.round_dp(2),
                self.threshold
            )),
            AlertCondition::ChangeUp if change >= self.threshold => Some(format!(
                "{} up {}% (>= {}%)",
                self.symbol,
                change.round_dp(2),
                self.threshold
            )),
            AlertCondition::ChangeDown if change <= -self.threshold => Some(format!(
                "{} down {}% (>= {}%)",
                self.symbol,
                change.abs().round_dp(2),
                self.threshold
            )),
            _ => None,
        }
    }
}

/// Emitted when an alert fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    /// Alert that fired.
    pub alert_id: Uuid,
    /// Its symbol.
    pub symbol: String,
    /// Its condition.
    pub condition: AlertCondition,
    /// Human-readable message.
    pub message: String,
    /// When it fired.
    pub triggered_at: DateTime<Utc>,
}

/// Evaluate alerts in order, marking the ones that fire.
pub fn evaluate(
    alerts: &mut [Alert],
    quotes: &HashMap<String, Quote>,
    now: DateTime<Utc>,
) -> Vec<AlertNotification> {
    alerts
        .iter_mut()
        .filter_map(|alert| {
            let message = alert.check(quotes)?;
            alert.triggered = true;
            Some(AlertNotification {
                alert_id: alert.id,
                symbol: alert.symbol.clone(),
                condition: alert.condition,
                message,
                triggered_at: now,
            })
        })
        .collect()
}
