//! Holding statistics: win rate, best and worst positions, per-holding
//! breakdown.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderAggregate, OrderSide, Portfolio};
use crate::domain::market::{PRICE_SCALE, Quote};

/// A symbol with a money value and its percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStat {
    /// Ticker.
    pub symbol: String,
    /// Money value in currency units.
    pub value: Decimal,
    /// Percentage relative to the value's basis.
    pub percent: Decimal,
}

/// Per-holding figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBreakdown {
    /// Ticker.
    pub symbol: String,
    /// Shares held.
    pub quantity: u64,
    /// Average buy price, or the reference price without buy history.
    pub cost_basis: Decimal,
    /// Resolved current price.
    pub current_price: Decimal,
    /// Market value in currency units.
    pub holding_value: Decimal,
    /// Cost in currency units, fees excluded.
    pub cost_value: Decimal,
    /// `holding_value − cost_value`.
    pub diff: Decimal,
    /// Diff relative to cost.
    pub diff_percent: Decimal,
    /// Change in value since the reference close.
    pub today_change: Decimal,
    /// Price change since the reference close, percent.
    pub today_change_percent: Decimal,
}

/// Aggregate statistics over holdings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioStats {
    /// Holdings with a main-board quote.
    pub total_positions: usize,
    /// Positions above cost.
    pub profitable: usize,
    /// Positions below cost.
    pub losing: usize,
    /// `profitable / total_positions × 100`.
    pub win_rate: Decimal,
    /// Σ gains / Σ losses; `None` when there are gains but no losses.
    pub profit_factor: Option<Decimal>,
    /// Mean gain of the profitable positions.
    pub avg_profit: Decimal,
    /// Mean loss of the losing positions, as a positive amount.
    pub avg_loss: Decimal,
    /// Best position by diff.
    pub best: Option<StockStat>,
    /// Worst position by diff.
    pub worst: Option<StockStat>,
    /// Best position by today's change.
    pub best_today: Option<StockStat>,
    /// Worst position by today's change.
    pub worst_today: Option<StockStat>,
    /// Largest position by market value.
    pub largest: Option<StockStat>,
    /// One entry per quoted holding.
    pub breakdown: Vec<PositionBreakdown>,
}

impl PortfolioStats {
    /// Compute statistics for the holdings that have a main-board quote.
    #[must_use]
    pub fn compute(portfolio: &Portfolio, quotes: &HashMap<String, Quote>) -> Self {
        let buys = portfolio.orders(OrderSide::Buy);
        let breakdown: Vec<PositionBreakdown> = portfolio
            .holdings()
            .iter()
            .filter_map(|holding| {
                let quote = quotes.get(&holding.symbol).and_then(Quote::as_main)?;
                let current_price = quote.current_price();
                let reference = quote.reference_price();
                let cost_basis = OrderAggregate::of(buys, &holding.symbol)
                    .map_or(reference, |agg| agg.average_price());
                let quantity = Decimal::from(holding.quantity);

                let holding_value = current_price * quantity * PRICE_SCALE;
                let cost_value = cost_basis * quantity * PRICE_SCALE;
                let diff = holding_value - cost_value;
                Some(PositionBreakdown {
                    symbol: holding.symbol.clone(),
                    quantity: holding.quantity,
                    cost_basis,
                    current_price,
                    holding_value,
                    cost_value,
                    diff,
                    diff_percent: percent(diff, cost_value),
                    today_change: (current_price - reference) * quantity * PRICE_SCALE,
                    today_change_percent: quote.change_percent(),
                })
            })
            .collect();

        let profitable = breakdown.iter().filter(|b| b.diff > Decimal::ZERO).count();
        let losing = breakdown.iter().filter(|b| b.diff < Decimal::ZERO).count();
        let gains: Decimal = breakdown.iter().map(|b| b.diff.max(Decimal::ZERO)).sum();
        let losses: Decimal = breakdown.iter().map(|b| (-b.diff).max(Decimal::ZERO)).sum();

        let profit_factor = if losses > Decimal::ZERO {
            Some(gains / losses)
        } else if gains > Decimal::ZERO {
            None
        } else {
            Some(Decimal::ZERO)
        };

        let pick = |key: fn(&PositionBreakdown) -> (Decimal, Decimal), want_max: bool| {
            breakdown
                .iter()
                .filter(|b| {
                    let (value, _) = key(b);
                    if want_max { value > Decimal::ZERO } else { value < Decimal::ZERO }
                })
                .reduce(|a, b| {
                    let better = if want_max { key(b).0 > key(a).0 } else { key(b).0 < key(a).0 };
                    if better { b } else { a }
                })
                .map(|b| {
                    let (value, percent) = key(b);
                    StockStat { symbol: b.symbol.clone(), value, percent }
                })
        };

        let total_positions = breakdown.len();
        Self {
            total_positions,
            profitable,
            losing,
            win_rate: percent(Decimal::from(profitable), Decimal::from(total_positions)),
            profit_factor,
            avg_profit: mean(gains, profitable),
            avg_loss: mean(losses, losing),
            best: pick(|b| (b.diff, b.diff_percent), true),
            worst: pick(|b| (b.diff, b.diff_percent), false),
            best_today: pick(|b| (b.today_change, b.today_change_percent), true),
            worst_today: pick(|b| (b.today_change, b.today_change_percent), false),
            largest: pick(|b| (b.holding_value, Decimal::ZERO), true),
            breakdown,
        }
    }
}

fn mean(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        total / Decimal::from(count)
    }
}

fn percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole > Decimal::ZERO {
        part / whole * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}
