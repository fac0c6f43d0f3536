//! Portfolio Positions
//!
//! User-owned positions read and written through the monitor's API:
//! followed symbols, holdings, and the buy / sell order books. Orders of the
//! same symbol and (nearly) the same fee rate are merged into one line with a
//! quantity-weighted average price.

pub mod pnl;
pub mod stats;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pnl::{PortfolioCalculator, PortfolioSummary, PositionRow, RowKind};
pub use stats::{PortfolioStats, PositionBreakdown, StockStat};

/// Default fee rate applied to buy orders (0.03%).
pub const DEFAULT_BUY_FEE: Decimal = dec!(0.0003);

/// Default fee rate applied to sell orders (0.13%).
pub const DEFAULT_SELL_FEE: Decimal = dec!(0.0013);

/// Fee rates closer than this are treated as equal when merging orders.
pub const FEE_MATCH_TOLERANCE: Decimal = dec!(0.0001);

// =============================================================================
// Errors
// =============================================================================

/// Rejected portfolio mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortfolioError {
    /// Symbol was empty after trimming.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Quantity must be strictly positive.
    #[error("quantity must be greater than zero")]
    ZeroQuantity,

    /// Price must not be negative.
    #[error("price must not be negative: {0}")]
    NegativePrice(Decimal),

    /// Fee rate outside `[0, 1)`.
    #[error("fee rate must be in [0, 1): {0}")]
    InvalidFeeRate(Decimal),

    /// No holding for the symbol.
    #[error("no holding for {0}")]
    HoldingNotFound(String),

    /// Order line index out of range.
    #[error("order line {index} out of range ({len} lines)")]
    OrderLineOutOfRange {
        /// Requested line.
        index: usize,
        /// Number of lines on that side.
        len: usize,
    },

    /// Quantity or amount beyond what a position can hold.
    #[error("position size overflows for {0}")]
    Overflow(String),
}

fn normalize_symbol(symbol: &str) -> Result<String, PortfolioError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(PortfolioError::EmptySymbol);
    }
    Ok(symbol)
}

// =============================================================================
// Entities
// =============================================================================

/// Shares held outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Upper-case ticker.
    pub symbol: String,
    /// Number of shares, always positive.
    pub quantity: u64,
}

/// Side of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Bought, not yet settled.
    Buy,
    /// Sold, watched until settlement.
    Sell,
}

impl OrderSide {
    /// Fee rate applied when none is given.
    #[must_use]
    pub const fn default_fee(&self) -> Decimal {
        match self {
            Self::Buy => DEFAULT_BUY_FEE,
            Self::Sell => DEFAULT_SELL_FEE,
        }
    }

    /// Lower-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// One order line. Prices are in display units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Upper-case ticker.
    pub symbol: String,
    /// Number of shares, always positive.
    pub quantity: u64,
    /// Execution price in display units.
    pub price: Decimal,
    /// Fee rate in `[0, 1)`.
    pub fee_rate: Decimal,
}

impl Order {
    /// Validated order line. The symbol is upper-cased.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty symbol, zero quantity, a negative price,
    /// a fee rate outside `[0, 1)`, or an amount too large to represent.
    pub fn new(
        symbol: &str,
        quantity: u64,
        price: Decimal,
        fee_rate: Decimal,
    ) -> Result<Self, PortfolioError> {
        let symbol = normalize_symbol(symbol)?;
        if quantity == 0 {
            return Err(PortfolioError::ZeroQuantity);
        }
        if price < Decimal::ZERO {
            return Err(PortfolioError::NegativePrice(price));
        }
        if fee_rate < Decimal::ZERO || fee_rate >= Decimal::ONE {
            return Err(PortfolioError::InvalidFeeRate(fee_rate));
        }
        if price.checked_mul(Decimal::from(quantity)).is_none() {
            return Err(PortfolioError::Overflow(symbol));
        }
        Ok(Self {
            symbol,
            quantity,
            price,
            fee_rate,
        })
    }

    /// `price × quantity`.
    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// `fee_rate × price × quantity`.
    #[must_use]
    pub fn fee(&self) -> Decimal {
        self.fee_rate * self.amount()
    }

    fn mergeable_with(&self, other: &Self) -> bool {
        self.symbol == other.symbol && (self.fee_rate - other.fee_rate).abs() < FEE_MATCH_TOLERANCE
    }

    fn absorb(&mut self, other: &Self) -> Result<(), PortfolioError> {
        let overflow = || PortfolioError::Overflow(self.symbol.clone());
        let quantity = self.quantity.checked_add(other.quantity).ok_or_else(overflow)?;
        let amount = self.amount().checked_add(other.amount()).ok_or_else(overflow)?;
        self.price = amount / Decimal::from(quantity);
        self.quantity = quantity;
        Ok(())
    }
}

/// Totals over every order line of one symbol on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderAggregate {
    /// Total shares.
    pub quantity: u64,
    /// Σ price × quantity.
    pub amount: Decimal,
    /// Σ fee rate × price × quantity.
    pub fee: Decimal,
}

impl OrderAggregate {
    /// Aggregate the lines of `symbol`, `None` if there are none.
    #[must_use]
    pub fn of<'a>(orders: impl IntoIterator<Item = &'a Order>, symbol: &str) -> Option<Self> {
        let agg = orders
            .into_iter()
            .filter(|o| o.symbol == symbol)
            .fold(Self::default(), |acc, o| Self {
                quantity: acc.quantity.saturating_add(o.quantity),
                amount: acc.amount.saturating_add(o.amount()),
                fee: acc.fee.saturating_add(o.fee()),
            });
        (agg.quantity > 0).then_some(agg)
    }

    /// Quantity-weighted average price.
    #[must_use]
    pub fn average_price(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        self.amount / Decimal::from(self.quantity)
    }
}

// =============================================================================
// Portfolio
// =============================================================================

/// Every position the user tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    following: Vec<String>,
    holdings: Vec<Holding>,
    buy_orders: Vec<Order>,
    sell_orders: Vec<Order>,
}

impl Portfolio {
    /// Empty portfolio.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Followed symbols, in insertion order.
    #[must_use]
    pub fn following(&self) -> &[String] {
        &self.following
    }

    /// Holdings, in insertion order.
    #[must_use]
    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    /// Order lines of one side, in insertion order.
    #[must_use]
    pub fn orders(&self, side: OrderSide) -> &[Order] {
        match side {
            OrderSide::Buy => &self.buy_orders,
            OrderSide::Sell => &self.sell_orders,
        }
    }

    fn orders_mut(&mut self, side: OrderSide) -> &mut Vec<Order> {
        match side {
            OrderSide::Buy => &mut self.buy_orders,
            OrderSide::Sell => &mut self.sell_orders,
        }
    }

    /// Follow a symbol. Returns `false` if it was already followed.
    ///
    /// # Errors
    ///
    /// Returns [`PortfolioError::EmptySymbol`] for a blank symbol.
    pub fn add_following(&mut self, symbol: &str) -> Result<bool, PortfolioError> {
        let symbol = normalize_symbol(symbol)?;
        if self.following.contains(&symbol) {
            return Ok(false);
        }
        self.following.push(symbol);
        Ok(true)
    }

    /// Stop following a symbol. Returns `true` if it was followed.
    pub fn remove_following(&mut self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();
        let before = self.following.len();
        self.following.retain(|s| *s != symbol);
        self.following.len() != before
    }

    /// Add shares. An existing holding of the symbol grows by `quantity`.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank symbol, zero quantity, or a total that
    /// does not fit in `u64`.
    pub fn add_holding(&mut self, symbol: &str, quantity: u64) -> Result<(), PortfolioError> {
        let symbol = normalize_symbol(symbol)?;
        if quantity == 0 {
            return Err(PortfolioError::ZeroQuantity);
        }
        if let Some(existing) = self.holdings.iter_mut().find(|h| h.symbol == symbol) {
            existing.quantity = existing
                .quantity
                .checked_add(quantity)
                .ok_or(PortfolioError::Overflow(symbol))?;
        } else {
            self.holdings.push(Holding { symbol, quantity });
        }
        Ok(())
    }

    /// Replace the quantity of an existing holding.
    ///
    /// # Errors
    ///
    /// Returns an error for zero quantity or an unknown symbol.
    pub fn update_holding(&mut self, symbol: &str, quantity: u64) -> Result<(), PortfolioError> {
        let symbol = normalize_symbol(symbol)?;
        if quantity == 0 {
            return Err(PortfolioError::ZeroQuantity);
        }
        let holding = self
            .holdings
            .iter_mut()
            .find(|h| h.symbol == symbol)
            .ok_or(PortfolioError::HoldingNotFound(symbol))?;
        holding.quantity = quantity;
        Ok(())
    }

    /// Remove a holding. Returns `true` if one existed.
    pub fn remove_holding(&mut self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();
        let before = self.holdings.len();
        self.holdings.retain(|h| h.symbol != symbol);
        self.holdings.len() != before
    }

    /// Add an order line, merging into an existing line of the same symbol
    /// and fee rate. Returns the index of the line that now holds it.
    ///
    /// # Errors
    ///
    /// Returns [`PortfolioError::Overflow`] if the merged line would not fit;
    /// the existing line is left unchanged.
    pub fn add_order(&mut self, side: OrderSide, order: Order) -> Result<usize, PortfolioError> {
        let orders = self.orders_mut(side);
        if let Some((index, existing)) = orders
            .iter_mut()
            .enumerate()
            .find(|(_, o)| o.mergeable_with(&order))
        {
            existing.absorb(&order)?;
            return Ok(index);
        }
        orders.push(order);
        Ok(orders.len() - 1)
    }

    /// Replace the order line at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PortfolioError::OrderLineOutOfRange`] for an unknown line.
    pub fn update_order(
        &mut self,
        side: OrderSide,
        index: usize,
        order: Order,
    ) -> Result<(), PortfolioError> {
        let orders = self.orders_mut(side);
        let len = orders.len();
        let slot = orders
            .get_mut(index)
            .ok_or(PortfolioError::OrderLineOutOfRange { index, len })?;
        *slot = order;
        Ok(())
    }

    /// Remove every line of `symbol` on one side. Returns the number removed.
    pub fn remove_orders(&mut self, side: OrderSide, symbol: &str) -> usize {
        let symbol = symbol.trim().to_uppercase();
        let orders = self.orders_mut(side);
        let before = orders.len();
        orders.retain(|o| o.symbol != symbol);
        before - orders.len()
    }

    /// Ordered, de-duplicated union of followed, held, bought and sold
    /// symbols.
    #[must_use]
    pub fn symbols_of_interest(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        let all = self
            .following
            .iter()
            .chain(self.holdings.iter().map(|h| &h.symbol))
            .chain(self.buy_orders.iter().map(|o| &o.symbol))
            .chain(self.sell_orders.iter().map(|o| &o.symbol));
        for symbol in all {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols
    }
}
