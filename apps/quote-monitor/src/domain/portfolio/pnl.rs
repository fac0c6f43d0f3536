//! Profit / Loss Calculation
//!
//! Derives per-position diffs and portfolio totals from the quote map.
//! Money results are in currency units (display price × 1000) and rounded
//! half-up to whole units.
//!
//! The sell side is deliberately asymmetric: the per-row diff shown for a
//! watched sell ignores fees, while the sell contribution to the portfolio
//! total subtracts them.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{OrderAggregate, OrderSide, Portfolio};
use crate::domain::market::{MainQuote, PRICE_SCALE, PriceTrend, Quote};

/// Round half-up to a whole number (ties go towards positive infinity).
#[must_use]
pub fn round_half_up(value: Decimal) -> Decimal {
    (value + dec!(0.5)).floor()
}

fn main_quote<'a>(quotes: &'a HashMap<String, Quote>, symbol: &str) -> Option<&'a MainQuote> {
    quotes.get(symbol).and_then(Quote::as_main)
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole > Decimal::ZERO {
        part / whole * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

// =============================================================================
// Per-position diffs
// =============================================================================

/// `round((current − reference) × quantity) × 1000`.
#[must_use]
pub fn holding_diff(quote: &MainQuote, quantity: u64) -> Decimal {
    let change = quote.current_price() - quote.reference_price();
    round_half_up(change * Decimal::from(quantity)) * PRICE_SCALE
}

/// `round(((current − average cost) × quantity − fees) × 1000)`.
#[must_use]
pub fn buy_diff(quote: &MainQuote, buys: &OrderAggregate) -> Decimal {
    let change = quote.current_price() - buys.average_price();
    round_half_up((change * Decimal::from(buys.quantity) - buys.fee) * PRICE_SCALE)
}

/// Row value for a watched sell: `round((average sell − current) × quantity
/// × 1000)`, without fees.
#[must_use]
pub fn sell_display_diff(quote: &MainQuote, sells: &OrderAggregate) -> Decimal {
    let change = sells.average_price() - quote.current_price();
    round_half_up(change * Decimal::from(sells.quantity) * PRICE_SCALE)
}

/// Portfolio-total contribution of a watched sell:
/// `round(((average sell − current) × quantity − fees) × 1000)`.
#[must_use]
pub fn sell_realized_diff(quote: &MainQuote, sells: &OrderAggregate) -> Decimal {
    let change = sells.average_price() - quote.current_price();
    round_half_up((change * Decimal::from(sells.quantity) - sells.fee) * PRICE_SCALE)
}

// =============================================================================
// Rows
// =============================================================================

/// Which list a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// Followed symbol, no position.
    Following,
    /// Shares held.
    Holding,
    /// Aggregated buy lines.
    Buy,
    /// Aggregated sell lines.
    Sell,
}

/// Display values for one symbol in one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRow {
    /// List the row belongs to.
    pub kind: RowKind,
    /// Ticker.
    pub symbol: String,
    /// Shares (zero for followed symbols).
    pub quantity: u64,
    /// Resolved current price, display units.
    pub current_price: Decimal,
    /// Price the change is measured against, display units.
    pub basis: Decimal,
    /// Signed change against the basis.
    pub change: Decimal,
    /// Change as a percentage of the basis.
    pub change_percent: Decimal,
    /// Visual classification.
    pub trend: PriceTrend,
    /// Money diff in currency units, absent for followed symbols.
    pub diff: Option<Decimal>,
}

impl PositionRow {
    fn build(
        kind: RowKind,
        quote: &MainQuote,
        quantity: u64,
        basis: Decimal,
        change: Decimal,
        diff: Option<Decimal>,
    ) -> Self {
        let current_price = quote.current_price();
        Self {
            kind,
            symbol: quote.symbol.clone(),
            quantity,
            current_price,
            basis,
            change,
            change_percent: percent_of(change, basis),
            trend: quote.trend_of(current_price, change),
            diff,
        }
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Portfolio-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Sum of holding, buy-only and (when watched) sell diffs.
    pub total_diff: Decimal,
    /// Cost of everything held or bought, fees included.
    pub total_investment: Decimal,
    /// Market value of everything held or bought.
    pub current_value: Decimal,
    /// Change in market value since the reference close.
    pub today_pl: Decimal,
    /// `current_value − total_investment`.
    pub total_pl: Decimal,
    /// Total P/L relative to investment.
    pub total_pl_percent: Decimal,
    /// Today's P/L relative to investment.
    pub today_pl_percent: Decimal,
}

/// Computes rows and totals for a portfolio against a quote map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioCalculator {
    sell_watching: bool,
}

impl Default for PortfolioCalculator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PortfolioCalculator {
    /// Calculator; `sell_watching` includes watched sells in the totals.
    #[must_use]
    pub const fn new(sell_watching: bool) -> Self {
        Self { sell_watching }
    }

    /// Totals over the portfolio. Symbols without a main-board quote are
    /// skipped.
    #[must_use]
    pub fn summary(&self, portfolio: &Portfolio, quotes: &HashMap<String, Quote>) -> PortfolioSummary {
        let mut total_diff = Decimal::ZERO;
        let mut investment = Decimal::ZERO;
        let mut current_value = Decimal::ZERO;
        let mut today_pl = Decimal::ZERO;

        let buys = portfolio.orders(OrderSide::Buy);
        let mut held: HashSet<&str> = HashSet::new();

        for holding in portfolio.holdings() {
            if !held.insert(holding.symbol.as_str()) {
                continue;
            }
            let Some(quote) = main_quote(quotes, &holding.symbol) else {
                continue;
            };
            let current = quote.current_price();
            let reference = quote.reference_price();
            let quantity = Decimal::from(holding.quantity);

            let (avg_cost, fee) = OrderAggregate::of(buys, &holding.symbol)
                .map_or((reference, Decimal::ZERO), |agg| (agg.average_price(), agg.fee));

            investment += avg_cost * quantity * PRICE_SCALE + fee * PRICE_SCALE;
            current_value += current * quantity * PRICE_SCALE;
            today_pl += (current - reference) * quantity * PRICE_SCALE;
            total_diff += holding_diff(quote, holding.quantity);
        }

        for symbol in distinct_symbols(buys.iter().map(|o| o.symbol.as_str())) {
            if held.contains(symbol) {
                continue;
            }
            let (Some(quote), Some(agg)) = (main_quote(quotes, symbol), OrderAggregate::of(buys, symbol))
            else {
                continue;
            };
            let current = quote.current_price();
            let quantity = Decimal::from(agg.quantity);

            investment += (agg.amount + agg.fee) * PRICE_SCALE;
            current_value += current * quantity * PRICE_SCALE;
            today_pl += (current - quote.reference_price()) * quantity * PRICE_SCALE;
            total_diff += buy_diff(quote, &agg);
        }

        if self.sell_watching {
            let sells = portfolio.orders(OrderSide::Sell);
            for symbol in distinct_symbols(sells.iter().map(|o| o.symbol.as_str())) {
                if let (Some(quote), Some(agg)) =
                    (main_quote(quotes, symbol), OrderAggregate::of(sells, symbol))
                {
                    total_diff += sell_realized_diff(quote, &agg);
                }
            }
        }

        let total_pl = current_value - investment;
        PortfolioSummary {
            total_diff,
            total_investment: round_half_up(investment),
            current_value: round_half_up(current_value),
            today_pl: round_half_up(today_pl),
            total_pl: round_half_up(total_pl),
            total_pl_percent: percent_of(total_pl, investment),
            today_pl_percent: percent_of(today_pl, investment),
        }
    }

    /// One row per followed symbol, holding, and bought / sold symbol that
    /// has a main-board quote.
    #[must_use]
    pub fn rows(&self, portfolio: &Portfolio, quotes: &HashMap<String, Quote>) -> Vec<PositionRow> {
        let mut rows = Vec::new();

        for symbol in portfolio.following() {
            if let Some(quote) = main_quote(quotes, symbol) {
                let reference = quote.reference_price();
                let change = quote.current_price() - reference;
                rows.push(PositionRow::build(RowKind::Following, quote, 0, reference, change, None));
            }
        }

        for holding in portfolio.holdings() {
            if let Some(quote) = main_quote(quotes, &holding.symbol) {
                let reference = quote.reference_price();
                let change = quote.current_price() - reference;
                let diff = holding_diff(quote, holding.quantity);
                rows.push(PositionRow::build(
                    RowKind::Holding,
                    quote,
                    holding.quantity,
                    reference,
                    change,
                    Some(diff),
                ));
            }
        }

        for side in [OrderSide::Buy, OrderSide::Sell] {
            let orders = portfolio.orders(side);
            for symbol in distinct_symbols(orders.iter().map(|o| o.symbol.as_str())) {
                let (Some(quote), Some(agg)) = (main_quote(quotes, symbol), OrderAggregate::of(orders, symbol))
                else {
                    continue;
                };
                let avg = agg.average_price();
                let current = quote.current_price();
                let row = match side {
                    OrderSide::Buy => PositionRow::build(
                        RowKind::Buy,
                        quote,
                        agg.quantity,
                        avg,
                        current - avg,
                        Some(buy_diff(quote, &agg)),
                    ),
                    OrderSide::Sell => PositionRow::build(
                        RowKind::Sell,
                        quote,
                        agg.quantity,
                        avg,
                        avg - current,
                        Some(sell_display_diff(quote, &agg)),
                    ),
                };
                rows.push(row);
            }
        }

        rows
    }
}

fn distinct_symbols<'a>(symbols: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for symbol in symbols {
        if !seen.contains(&symbol) {
            seen.push(symbol);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::domain::portfolio::{DEFAULT_BUY_FEE, DEFAULT_SELL_FEE, Order};

    fn quote(symbol: &str, reference: Decimal, last: Decimal) -> MainQuote {
        MainQuote {
            board: "HOSE".into(),
            reference,
            last_price: last,
            ceiling: reference * dec!(1.07),
            floor: reference * dec!(0.93),
            update_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            ..MainQuote::empty(symbol)
        }
    }

    fn quotes(list: &[MainQuote]) -> HashMap<String, Quote> {
        list.iter()
            .map(|q| (q.symbol.clone(), Quote::Main(q.clone())))
            .collect()
    }

    fn agg(side: OrderSide, symbol: &str, quantity: u64, price: Decimal) -> OrderAggregate {
        let order = Order::new(symbol, quantity, price, side.default_fee()).unwrap();
        OrderAggregate::of([&order], symbol).unwrap()
    }

    #[test]
    fn rounding_matches_half_up() {
        assert_eq!(round_half_up(dec!(2.5)), dec!(3));
        assert_eq!(round_half_up(dec!(-2.5)), dec!(-2));
        assert_eq!(round_half_up(dec!(-2.51)), dec!(-3));
        assert_eq!(round_half_up(dec!(7.49)), dec!(7));
    }

    #[test]
    fn holding_diff_end_to_end() {
        let mbb = quote("MBB", dec!(21000), dec!(21500));
        assert_eq!(holding_diff(&mbb, 1000), dec!(500000));
    }

    #[test]
    fn holding_diff_rounds_before_scaling() {
        // (21.5 - 21.0) * 3 = 1.5 -> 2 -> 2000
        let mbb = quote("MBB", dec!(21000), dec!(21500));
        assert_eq!(holding_diff(&mbb, 3), dec!(2000));
    }

    #[test]
    fn buy_diff_subtracts_fees() {
        let mbb = quote("MBB", dec!(21000), dec!(21500));
        let buys = agg(OrderSide::Buy, "MBB", 1000, dec!(21));
        // fee = 0.0003 * 21 * 1000 = 6.3
        assert_eq!(buy_diff(&mbb, &buys), dec!(493700));
    }

    #[test]
    fn sell_row_excludes_fee_but_total_includes_it() {
        let mbb = quote("MBB", dec!(21000), dec!(21500));
        let sells = agg(OrderSide::Sell, "MBB", 1000, dec!(22));
        // fee = 0.0013 * 22 * 1000 = 28.6
        assert_eq!(sell_display_diff(&mbb, &sells), dec!(500000));
        assert_eq!(sell_realized_diff(&mbb, &sells), dec!(471400));
    }

    #[test]
    fn summary_for_holding_with_buy_history() {
        let mut portfolio = Portfolio::new();
        portfolio.add_holding("MBB", 1000).unwrap();
        portfolio
            .add_order(
                OrderSide::Buy,
                Order::new("MBB", 1000, dec!(21), DEFAULT_BUY_FEE).unwrap(),
            )
            .unwrap();
        let map = quotes(&[quote("MBB", dec!(21000), dec!(21500))]);

        let summary = PortfolioCalculator::default().summary(&portfolio, &map);
        assert_eq!(summary.total_investment, dec!(21006300));
        assert_eq!(summary.current_value, dec!(21500000));
        assert_eq!(summary.today_pl, dec!(500000));
        assert_eq!(summary.total_pl, dec!(493700));
        // Holding takes priority; the buy line is not counted twice.
        assert_eq!(summary.total_diff, dec!(500000));
    }

    #[test]
    fn summary_for_buy_only_symbol() {
        let mut portfolio = Portfolio::new();
        portfolio
            .add_order(
                OrderSide::Buy,
                Order::new("FPT", 100, dec!(95), DEFAULT_BUY_FEE).unwrap(),
            )
            .unwrap();
        let map = quotes(&[quote("FPT", dec!(94000), dec!(96000))]);

        let summary = PortfolioCalculator::default().summary(&portfolio, &map);
        assert_eq!(summary.total_investment, dec!(9502850));
        assert_eq!(summary.current_value, dec!(9600000));
        assert_eq!(summary.today_pl, dec!(200000));
        assert_eq!(summary.total_diff, dec!(97150));
        assert_eq!(summary.total_pl, dec!(97150));
        assert!(summary.total_pl_percent > dec!(1.02) && summary.total_pl_percent < dec!(1.03));
    }

    #[test]
    fn holding_without_buys_uses_reference_as_cost() {
        let mut portfolio = Portfolio::new();
        portfolio.add_holding("MBB", 1000).unwrap();
        let map = quotes(&[quote("MBB", dec!(21000), dec!(21500))]);

        let summary = PortfolioCalculator::default().summary(&portfolio, &map);
        assert_eq!(summary.total_investment, dec!(21000000));
        assert_eq!(summary.total_pl, summary.today_pl);
    }

    #[test]
    fn sell_watching_toggles_sell_contribution() {
        let mut portfolio = Portfolio::new();
        portfolio
            .add_order(
                OrderSide::Sell,
                Order::new("MBB", 1000, dec!(22), DEFAULT_SELL_FEE).unwrap(),
            )
            .unwrap();
        let map = quotes(&[quote("MBB", dec!(21000), dec!(21500))]);

        let watched = PortfolioCalculator::new(true).summary(&portfolio, &map);
        assert_eq!(watched.total_diff, dec!(471400));
        assert_eq!(watched.total_investment, Decimal::ZERO);
        assert_eq!(watched.total_pl_percent, Decimal::ZERO);

        let ignored = PortfolioCalculator::new(false).summary(&portfolio, &map);
        assert_eq!(ignored.total_diff, Decimal::ZERO);
    }

    #[test]
    fn symbols_without_quotes_are_skipped() {
        let mut portfolio = Portfolio::new();
        portfolio.add_holding("ACB", 100).unwrap();
        let summary = PortfolioCalculator::default().summary(&portfolio, &HashMap::new());
        assert_eq!(summary, PortfolioSummary::default());
    }

    #[test]
    fn rows_cover_every_list() {
        let mut portfolio = Portfolio::new();
        portfolio.add_following("HPG").unwrap();
        portfolio.add_holding("MBB", 1000).unwrap();
        portfolio
            .add_order(
                OrderSide::Buy,
                Order::new("MBB", 1000, dec!(21), DEFAULT_BUY_FEE).unwrap(),
            )
            .unwrap();
        portfolio
            .add_order(
                OrderSide::Sell,
                Order::new("MBB", 500, dec!(22), DEFAULT_SELL_FEE).unwrap(),
            )
            .unwrap();
        let map = quotes(&[
            quote("MBB", dec!(21000), dec!(21500)),
            quote("HPG", dec!(25000), dec!(26750)),
        ]);

        let rows = PortfolioCalculator::default().rows(&portfolio, &map);
        let kinds: Vec<RowKind> = rows.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![RowKind::Following, RowKind::Holding, RowKind::Buy, RowKind::Sell]
        );

        let following = &rows[0];
        assert_eq!(following.diff, None);
        assert_eq!(following.trend, PriceTrend::Ceiling);

        let sell = &rows[3];
        assert_eq!(sell.change, dec!(0.5));
        assert_eq!(sell.trend, PriceTrend::Up);
        assert_eq!(sell.diff, Some(dec!(250000)));
    }
}
