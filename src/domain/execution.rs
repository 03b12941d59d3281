//! Order execution against the portfolio ledger.
//!
//! Free functions over `&mut Portfolio`. Checks that fail on market grounds
//! (allocation bounds, buying power, zero size) return
//! [`OrderResult::Rejected`]; failures to price or fetch data return
//! non-fatal errors; accounting inconsistencies return fatal errors.

use chrono::NaiveDate;
use std::fmt;
use tracing::{info, warn};

use super::clock::Tick;
use super::error::TickReplayError;
use super::market::MarketData;
use super::option_symbol::{OptionContract, contract_for};
use super::portfolio::{Lot, Portfolio};
use super::position::AssetClass;
use super::strategy::{Allocation, Strategy, sizing};

/// Settlement price at which an option is treated as expired worthless.
pub const WORTHLESS_PRICE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ZeroQuantity,
    MaxAllocation,
    InsufficientBuyingPower,
    MinAllocation,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::ZeroQuantity => "order sized to zero units",
            RejectReason::MaxAllocation => "maximum allocation exceeded",
            RejectReason::InsufficientBuyingPower => "insufficient buying power",
            RejectReason::MinAllocation => "minimum allocation breached",
        };
        f.write_str(text)
    }
}

/// One executed leg.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub asset: String,
    pub price: f64,
    /// Signed change in the position: positive buys, negative sells.
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderResult {
    Filled(Vec<Fill>),
    Rejected(RejectReason),
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderResult::Filled(_))
    }
}

fn reject(asset: &str, reason: RejectReason) -> OrderResult {
    warn!(asset, %reason, "order rejected");
    OrderResult::Rejected(reason)
}

/// Buy `asset` according to the strategy's asset class and sizing.
pub fn buy(
    portfolio: &mut Portfolio,
    market: &mut MarketData,
    strategy: &Strategy,
    asset: &str,
    date: NaiveDate,
    tick: Tick,
) -> Result<OrderResult, TickReplayError> {
    match strategy.asset_class {
        AssetClass::Option if strategy.options.spread => {
            buy_spread(portfolio, market, strategy, asset, date, tick)
        }
        AssetClass::Option => buy_option(portfolio, market, strategy, asset, date, tick),
        AssetClass::Equity | AssetClass::Crypto => {
            buy_units(portfolio, market, strategy, asset, date, tick)
        }
    }
}

fn buy_units(
    portfolio: &mut Portfolio,
    market: &MarketData,
    strategy: &Strategy,
    asset: &str,
    date: NaiveDate,
    tick: Tick,
) -> Result<OrderResult, TickReplayError> {
    let price = market.price(asset, date, tick)?;
    let portfolio_value = portfolio.get_portfolio_value(market, date, tick)?;
    let quantity = sizing(
        strategy.asset_class,
        strategy.buying_allocation,
        strategy.buying_basis,
        portfolio_value,
        portfolio.buying_power(),
        price,
    );
    if quantity <= 0.0 {
        return Ok(reject(asset, RejectReason::ZeroQuantity));
    }

    let notional = quantity * price;
    let rejection = check_buy(
        portfolio,
        market,
        strategy,
        asset,
        notional,
        portfolio_value,
        date,
        tick,
    )?;
    if let Some(reason) = rejection {
        return Ok(reject(asset, reason));
    }

    portfolio.decrease_buying_power(notional);
    portfolio.add_lot(Lot {
        id: asset.to_string(),
        underlying: asset.to_string(),
        quantity,
        price,
        asset_class: strategy.asset_class,
        date,
        contract: None,
    });
    info!(
        asset,
        quantity,
        price,
        buying_power = portfolio.buying_power(),
        "bought"
    );
    Ok(OrderResult::Filled(vec![Fill {
        asset: asset.to_string(),
        price,
        quantity,
    }]))
}

/// Contract for `asset` at today's underlying price, fetched and priced.
fn priced_contract(
    market: &mut MarketData,
    asset: &str,
    underlying_price: f64,
    strikes_above: i32,
    strategy: &Strategy,
    date: NaiveDate,
    tick: Tick,
) -> Result<(OptionContract, f64), TickReplayError> {
    let contract = contract_for(
        asset,
        underlying_price,
        date,
        strikes_above,
        strategy.options.right,
    )
    .ok_or_else(|| TickReplayError::DataUnavailable {
        symbol: asset.to_string(),
        reason: format!("no listed contract at {:.2} on {}", underlying_price, date),
    })?;
    let symbol = contract.symbol();
    market.option_series(&symbol, date)?;
    let price = market.price(&symbol, date, tick)?;
    Ok((contract, price))
}

fn buy_option(
    portfolio: &mut Portfolio,
    market: &mut MarketData,
    strategy: &Strategy,
    asset: &str,
    date: NaiveDate,
    tick: Tick,
) -> Result<OrderResult, TickReplayError> {
    let underlying_price = market.price(asset, date, tick)?;
    let (contract, price) = priced_contract(
        market,
        asset,
        underlying_price,
        strategy.options.strikes_above,
        strategy,
        date,
        tick,
    )?;
    let symbol = contract.symbol();

    let portfolio_value = portfolio.get_portfolio_value(market, date, tick)?;
    let quantity = sizing(
        AssetClass::Option,
        strategy.buying_allocation,
        strategy.buying_basis,
        portfolio_value,
        portfolio.buying_power(),
        price,
    );
    if quantity == 0.0 {
        return Ok(reject(&symbol, RejectReason::ZeroQuantity));
    }

    let notional = quantity * price * AssetClass::Option.multiplier();
    let rejection = check_buy(
        portfolio,
        market,
        strategy,
        asset,
        notional,
        portfolio_value,
        date,
        tick,
    )?;
    if let Some(reason) = rejection {
        return Ok(reject(&symbol, reason));
    }

    portfolio.decrease_buying_power(notional);
    portfolio.add_lot(Lot {
        id: symbol.clone(),
        underlying: asset.to_string(),
        quantity,
        price,
        asset_class: AssetClass::Option,
        date,
        contract: Some(contract),
    });
    info!(
        symbol = %symbol,
        quantity,
        price,
        buying_power = portfolio.buying_power(),
        "opened option"
    );
    Ok(OrderResult::Filled(vec![Fill {
        asset: symbol,
        price,
        quantity,
    }]))
}

/// Long leg at `strikes_above`, short leg one strike band further out.
fn buy_spread(
    portfolio: &mut Portfolio,
    market: &mut MarketData,
    strategy: &Strategy,
    asset: &str,
    date: NaiveDate,
    tick: Tick,
) -> Result<OrderResult, TickReplayError> {
    let underlying_price = market.price(asset, date, tick)?;
    let strikes_above = strategy.options.strikes_above;
    let (long, long_price) =
        priced_contract(market, asset, underlying_price, strikes_above, strategy, date, tick)?;
    let (short, short_price) =
        priced_contract(market, asset, underlying_price, strikes_above + 1, strategy, date, tick)?;

    let portfolio_value = portfolio.get_portfolio_value(market, date, tick)?;
    let net_price = long_price - short_price;
    let quantity = sizing(
        AssetClass::Option,
        strategy.buying_allocation,
        strategy.buying_basis,
        portfolio_value,
        portfolio.buying_power(),
        net_price.abs(),
    )
    .abs();
    if quantity == 0.0 {
        return Ok(reject(asset, RejectReason::ZeroQuantity));
    }

    let multiplier = AssetClass::Option.multiplier();
    let long_notional = quantity * long_price * multiplier;
    let short_notional = quantity * short_price * multiplier;
    let net_debit = long_notional - short_notional;
    let rejection = check_buy(
        portfolio,
        market,
        strategy,
        asset,
        net_debit,
        portfolio_value,
        date,
        tick,
    )?;
    if let Some(reason) = rejection {
        return Ok(reject(asset, reason));
    }

    portfolio.decrease_buying_power(long_notional);
    portfolio.increase_buying_power(short_notional);

    let long_symbol = long.symbol();
    let short_symbol = short.symbol();
    portfolio.add_lot(Lot {
        id: long_symbol.clone(),
        underlying: asset.to_string(),
        quantity,
        price: long_price,
        asset_class: AssetClass::Option,
        date,
        contract: Some(long),
    });
    portfolio.add_lot(Lot {
        id: short_symbol.clone(),
        underlying: asset.to_string(),
        quantity: -quantity,
        price: short_price,
        asset_class: AssetClass::Option,
        date,
        contract: Some(short),
    });
    info!(
        asset,
        long = %long_symbol,
        short = %short_symbol,
        quantity,
        net_debit,
        "opened spread"
    );
    Ok(OrderResult::Filled(vec![
        Fill {
            asset: long_symbol,
            price: long_price,
            quantity,
        },
        Fill {
            asset: short_symbol,
            price: short_price,
            quantity: -quantity,
        },
    ]))
}

#[allow(clippy::too_many_arguments)]
fn check_buy(
    portfolio: &Portfolio,
    market: &MarketData,
    strategy: &Strategy,
    underlying: &str,
    notional: f64,
    portfolio_value: f64,
    date: NaiveDate,
    tick: Tick,
) -> Result<Option<RejectReason>, TickReplayError> {
    let exposure = portfolio.exposure(market, underlying, date, tick)?;
    if exposure + notional > strategy.max_allocation * portfolio_value {
        return Ok(Some(RejectReason::MaxAllocation));
    }
    if notional >= portfolio.buying_power() {
        return Ok(Some(RejectReason::InsufficientBuyingPower));
    }
    Ok(None)
}

/// Close part or all of one position according to the selling allocation.
pub fn sell(
    portfolio: &mut Portfolio,
    market: &MarketData,
    strategy: &Strategy,
    position_id: &str,
    date: NaiveDate,
    tick: Tick,
) -> Result<OrderResult, TickReplayError> {
    let position = portfolio
        .find_position(position_id)
        .cloned()
        .ok_or_else(|| TickReplayError::NotHeld {
            asset: position_id.to_string(),
        })?;
    let price = market.price(position_id, date, tick)?;

    let held = position.quantity.abs();
    let requested = match strategy.selling_allocation {
        Allocation::Units(units) => units.unsigned_abs() as f64,
        Allocation::Fraction(fraction) => fraction * held,
    };
    let mut quantity = requested.min(held);
    if position.asset_class != AssetClass::Crypto {
        quantity = quantity.floor();
    }
    if quantity <= 0.0 {
        return Ok(reject(position_id, RejectReason::ZeroQuantity));
    }

    let signed = quantity * position.quantity.signum();
    let proceeds = signed * price * position.asset_class.multiplier();
    let portfolio_value = portfolio.get_portfolio_value(market, date, tick)?;
    let gross = portfolio.gross_exposure(market, &position.underlying, date, tick)?;
    if gross - proceeds.abs() < strategy.min_allocation * portfolio_value {
        return Ok(reject(position_id, RejectReason::MinAllocation));
    }

    settle(portfolio, proceeds);
    let closed = portfolio.reduce_position(position_id, quantity)?;
    info!(
        asset = position_id,
        quantity = closed,
        price,
        buying_power = portfolio.buying_power(),
        "sold"
    );
    Ok(OrderResult::Filled(vec![Fill {
        asset: position_id.to_string(),
        price,
        quantity: -closed,
    }]))
}

/// Close a whole position at the close of `settlement_date`.
///
/// An option settling at exactly [`WORTHLESS_PRICE`] expired worthless: it
/// is removed without credit or fee.
pub fn liquidate(
    portfolio: &mut Portfolio,
    market: &MarketData,
    position_id: &str,
    settlement_date: NaiveDate,
) -> Result<Fill, TickReplayError> {
    let position = portfolio
        .find_position(position_id)
        .cloned()
        .ok_or_else(|| TickReplayError::NotHeld {
            asset: position_id.to_string(),
        })?;
    let price = market.price(position_id, settlement_date, Tick::close())?;

    let worthless =
        position.asset_class == AssetClass::Option && (price - WORTHLESS_PRICE).abs() < 1e-9;
    if worthless {
        info!(asset = position_id, "expired worthless");
    } else {
        settle(portfolio, position.market_value(price));
    }
    let closed = portfolio.reduce_position(position_id, position.quantity.abs())?;
    Ok(Fill {
        asset: position_id.to_string(),
        price: if worthless { 0.0 } else { price },
        quantity: -closed,
    })
}

/// Liquidate every option whose expiration is before `date`.
///
/// A position that cannot be priced stays in the ledger and is retried on the
/// next sweep; the other expirations still go through.
pub fn expire_options(
    portfolio: &mut Portfolio,
    market: &MarketData,
    date: NaiveDate,
) -> Result<Vec<Fill>, TickReplayError> {
    let expired: Vec<(String, NaiveDate)> = portfolio
        .positions()
        .filter(|p| p.is_expired(date))
        .filter_map(|p| p.contract.as_ref().map(|c| (p.id.clone(), c.expiration)))
        .collect();

    let mut fills = Vec::with_capacity(expired.len());
    for (id, expiration) in expired {
        match liquidate(portfolio, market, &id, expiration) {
            Ok(fill) => {
                info!(asset = %id, %expiration, price = fill.price, "liquidated expired option");
                fills.push(fill);
            }
            Err(e) if !e.is_fatal() => {
                warn!(asset = %id, %expiration, error = %e, "expired option left for next sweep");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(fills)
}

/// Credit positive proceeds, pay for negative ones. Both charge the fee.
fn settle(portfolio: &mut Portfolio, proceeds: f64) {
    if proceeds >= 0.0 {
        portfolio.increase_buying_power(proceeds);
    } else {
        portfolio.decrease_buying_power(-proceeds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::Resolution;
    use crate::domain::condition::Condition;
    use crate::domain::ohlcv::{OhlcvBar, PriceSeries};
    use crate::domain::option_symbol::OptionRight;
    use crate::domain::strategy::AllocationBasis;
    use crate::ports::data_port::OptionDataPort;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flat(symbol: &str, days: &[NaiveDate], price: f64) -> PriceSeries {
        PriceSeries::from_daily(
            symbol,
            days.iter()
                .map(|&d| OhlcvBar {
                    date: d,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 1.0,
                })
                .collect(),
        )
    }

    fn equity_strategy() -> Strategy {
        Strategy::new("test", vec!["X".into()], Condition::All(vec![]))
    }

    fn open() -> Tick {
        Tick::open(Resolution::Daily)
    }

    #[test]
    fn buy_one_unit_charges_fee() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(10000.0, 5.0);

        let result = buy(&mut portfolio, &mut market, &equity_strategy(), "X", day, open()).unwrap();
        assert!(result.is_filled());
        assert!((portfolio.buying_power() - 9895.0).abs() < f64::EPSILON);
        let pos = portfolio.find_position("X").unwrap();
        assert_eq!(pos.quantity, 1.0);
        assert!((pos.avg_cost - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn buy_then_sell_costs_two_fees() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        let strategy = equity_strategy();

        buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();
        let result = sell(&mut portfolio, &market, &strategy, "X", day, open()).unwrap();
        assert!(result.is_filled());
        assert!((portfolio.buying_power() - 9990.0).abs() < 1e-9);
        assert!(portfolio.is_empty());
    }

    #[test]
    fn max_allocation_rejects() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        let mut strategy = equity_strategy();
        strategy.buying_allocation = Allocation::Units(20);
        strategy.max_allocation = 0.1;

        let result = buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::MaxAllocation));
        assert!((portfolio.buying_power() - 10000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn insufficient_buying_power_rejects() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(1000.0, 5.0);
        let mut strategy = equity_strategy();
        strategy.buying_allocation = Allocation::Units(10);

        let result = buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::InsufficientBuyingPower));
    }

    #[test]
    fn zero_sized_buy_rejects() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(1000.0, 5.0);
        let mut strategy = equity_strategy();
        strategy.buying_allocation = Allocation::Fraction(0.05);
        strategy.buying_basis = AllocationBasis::PercentPortfolio;

        let result = buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::ZeroQuantity));
    }

    #[test]
    fn sell_quantity_clamped_to_held() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 10.0)]);
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let mut strategy = equity_strategy();
        strategy.buying_allocation = Allocation::Units(3);
        buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();

        strategy.selling_allocation = Allocation::Units(50);
        let result = sell(&mut portfolio, &market, &strategy, "X", day, open()).unwrap();
        assert_eq!(
            result,
            OrderResult::Filled(vec![Fill {
                asset: "X".into(),
                price: 10.0,
                quantity: -3.0,
            }])
        );
        assert!(portfolio.holding("X").is_none());
    }

    #[test]
    fn min_allocation_rejects_sell() {
        let day = date(2024, 1, 8);
        let mut market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let mut strategy = equity_strategy();
        strategy.buying_allocation = Allocation::Units(10);
        buy(&mut portfolio, &mut market, &strategy, "X", day, open()).unwrap();

        strategy.min_allocation = 0.05;
        let result = sell(&mut portfolio, &market, &strategy, "X", day, open()).unwrap();
        assert_eq!(result, OrderResult::Rejected(RejectReason::MinAllocation));
        assert_eq!(portfolio.find_position("X").unwrap().quantity, 10.0);
    }

    #[test]
    fn selling_unheld_asset_is_fatal() {
        let day = date(2024, 1, 8);
        let market = MarketData::new(vec![flat("X", &[day], 100.0)]);
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let err = sell(&mut portfolio, &market, &equity_strategy(), "X", day, open()).unwrap_err();
        assert!(matches!(err, TickReplayError::NotHeld { .. }));
        assert!(err.is_fatal());
    }

    struct FixedOptions(HashMap<String, f64>);

    impl OptionDataPort for FixedOptions {
        fn fetch_option_series(
            &self,
            symbol: &str,
            start: NaiveDate,
        ) -> Result<PriceSeries, TickReplayError> {
            let price = self.0.get(symbol).copied().ok_or_else(|| {
                TickReplayError::DataUnavailable {
                    symbol: symbol.into(),
                    reason: "unknown contract".into(),
                }
            })?;
            let expiration = OptionContract::parse(symbol)
                .map(|c| c.expiration)
                .unwrap_or(start);
            let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= expiration).collect();
            Ok(flat(symbol, &days, price))
        }
    }

    fn option_strategy(spread: bool) -> Strategy {
        let mut strategy = Strategy::new("opt", vec!["CHGG".into()], Condition::All(vec![]));
        strategy.asset_class = AssetClass::Option;
        strategy.options.right = OptionRight::Call;
        strategy.options.spread = spread;
        strategy
    }

    #[test]
    fn option_buy_and_expiry_credit() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("CHGG", &[day], 41.0)]).with_option_source(
            Box::new(FixedOptions(HashMap::from([(
                "CHGG200320C00040000".to_string(),
                2.0,
            )]))),
        );
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        let strategy = option_strategy(false);

        let result = buy(&mut portfolio, &mut market, &strategy, "CHGG", day, open()).unwrap();
        assert!(result.is_filled());
        // 1 contract at 2.00 is 200 plus fee.
        assert!((portfolio.buying_power() - 9795.0).abs() < 1e-9);

        let fills = expire_options(&mut portfolio, &market, date(2020, 3, 21)).unwrap();
        assert_eq!(fills.len(), 1);
        assert!((portfolio.buying_power() - 9990.0).abs() < 1e-9);
        assert!(portfolio.is_empty());
    }

    #[test]
    fn worthless_expiry_credits_nothing() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("CHGG", &[day], 41.0)]).with_option_source(
            Box::new(FixedOptions(HashMap::from([(
                "CHGG200320C00040000".to_string(),
                0.01,
            )]))),
        );
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        buy(&mut portfolio, &mut market, &option_strategy(false), "CHGG", day, open()).unwrap();
        let after_buy = portfolio.buying_power();

        expire_options(&mut portfolio, &market, date(2020, 3, 21)).unwrap();
        assert!((portfolio.buying_power() - after_buy).abs() < f64::EPSILON);
        assert!(portfolio.is_empty());
    }

    #[test]
    fn spread_opens_two_legs_under_one_holding() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("CHGG", &[day], 41.0)]).with_option_source(
            Box::new(FixedOptions(HashMap::from([
                ("CHGG200320C00040000".to_string(), 3.0),
                ("CHGG200320C00045000".to_string(), 1.0),
            ]))),
        );
        let mut portfolio = Portfolio::new(10000.0, 5.0);

        let result = buy(&mut portfolio, &mut market, &option_strategy(true), "CHGG", day, open()).unwrap();
        let OrderResult::Filled(fills) = result else {
            panic!("spread should fill");
        };
        assert_eq!(fills.len(), 2);

        let holding = portfolio.holding("CHGG").unwrap();
        assert_eq!(holding.positions.len(), 2);
        assert_eq!(holding.long_legs().count(), 1);
        assert_eq!(holding.short_legs().count(), 1);
        // 300 debit, 100 credit, two fees.
        assert!((portfolio.buying_power() - 9790.0).abs() < 1e-9);
    }

    #[test]
    fn unavailable_option_is_not_fatal() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("CHGG", &[day], 41.0)])
            .with_option_source(Box::new(FixedOptions(HashMap::new())));
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        let err = buy(&mut portfolio, &mut market, &option_strategy(false), "CHGG", day, open())
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(market.options().fetch_count(), 1);
    }

    fn spread_market(underlying: PriceSeries) -> MarketData {
        MarketData::new(vec![underlying]).with_option_source(Box::new(FixedOptions(
            HashMap::from([
                ("CHGG200320C00040000".to_string(), 3.0),
                ("CHGG200320C00045000".to_string(), 1.0),
                ("CHGG200320C00050000".to_string(), 0.4),
            ]),
        )))
    }

    #[test]
    fn selling_spread_long_leg_fills() {
        let day = date(2020, 2, 14);
        let mut market = spread_market(flat("CHGG", &[day], 41.0));
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        let strategy = option_strategy(true);
        buy(&mut portfolio, &mut market, &strategy, "CHGG", day, open()).unwrap();

        let result = sell(&mut portfolio, &market, &strategy, "CHGG200320C00040000", day, open())
            .unwrap();
        assert_eq!(
            result,
            OrderResult::Filled(vec![Fill {
                asset: "CHGG200320C00040000".into(),
                price: 3.0,
                quantity: -1.0,
            }])
        );
        let holding = portfolio.holding("CHGG").unwrap();
        assert_eq!(holding.positions.len(), 1);
        assert_eq!(holding.short_legs().count(), 1);
        // 9790 after opening, plus 300 less the fee.
        assert!((portfolio.buying_power() - 10085.0).abs() < 1e-9);
    }

    #[test]
    fn partial_buy_to_close_of_short_option_fills() {
        let day = date(2020, 2, 14);
        let mut market = spread_market(flat("CHGG", &[day], 41.0));
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let mut strategy = option_strategy(false);
        strategy.buying_allocation = Allocation::Units(-4);
        strategy.selling_allocation = Allocation::Fraction(0.5);

        buy(&mut portfolio, &mut market, &strategy, "CHGG", day, open()).unwrap();
        assert_eq!(portfolio.find_position("CHGG200320C00040000").unwrap().quantity, -4.0);

        let result = sell(&mut portfolio, &market, &strategy, "CHGG200320C00040000", day, open())
            .unwrap();
        assert!(result.is_filled());
        assert_eq!(portfolio.find_position("CHGG200320C00040000").unwrap().quantity, -2.0);
        // Sold 4 for 1200, bought back 2 for 600.
        assert!((portfolio.buying_power() - 10600.0).abs() < 1e-9);
    }

    #[test]
    fn adjacent_spreads_net_the_shared_strike() {
        let (first, second) = (date(2020, 2, 14), date(2020, 2, 18));
        let underlying = PriceSeries::from_daily(
            "CHGG",
            [(first, 41.0), (second, 46.0)]
                .iter()
                .map(|&(d, price)| OhlcvBar {
                    date: d,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 1.0,
                })
                .collect(),
        );
        let mut market = spread_market(underlying);
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let strategy = option_strategy(true);

        buy(&mut portfolio, &mut market, &strategy, "CHGG", first, open()).unwrap();
        let result = buy(&mut portfolio, &mut market, &strategy, "CHGG", second, open()).unwrap();
        assert!(result.is_filled());

        assert!(portfolio.find_position("CHGG200320C00045000").is_none());
        assert!(portfolio.positions().all(|p| p.quantity != 0.0));
        let holding = portfolio.holding("CHGG").unwrap();
        assert_eq!(holding.positions.len(), 2);
        assert_eq!(portfolio.find_position("CHGG200320C00040000").unwrap().quantity, 1.0);
        assert_eq!(portfolio.find_position("CHGG200320C00050000").unwrap().quantity, -1.0);
    }

    #[test]
    fn expiry_sweep_keeps_going_past_unpriceable_contract() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("CHGG", &[day], 41.0)]).with_option_source(
            Box::new(FixedOptions(HashMap::from([
                ("CHGG200320C00040000".to_string(), 2.0),
                ("CHGG200320C00045000".to_string(), f64::NAN),
            ]))),
        );
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        buy(&mut portfolio, &mut market, &option_strategy(false), "CHGG", day, open()).unwrap();
        market.option_series("CHGG200320C00045000", day).unwrap();
        portfolio.add_lot(Lot {
            id: "CHGG200320C00045000".into(),
            underlying: "CHGG".into(),
            quantity: 1.0,
            price: 1.0,
            asset_class: AssetClass::Option,
            date: day,
            contract: OptionContract::parse("CHGG200320C00045000"),
        });

        let fills = expire_options(&mut portfolio, &market, date(2020, 3, 21)).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].asset, "CHGG200320C00040000");
        assert!(portfolio.find_position("CHGG200320C00040000").is_none());
        assert!(portfolio.find_position("CHGG200320C00045000").is_some());
    }

    #[test]
    fn put_below_lowest_strike_is_not_fatal() {
        let day = date(2020, 2, 14);
        let mut market = MarketData::new(vec![flat("PENY", &[day], 0.6)])
            .with_option_source(Box::new(FixedOptions(HashMap::new())));
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let mut strategy = option_strategy(false);
        strategy.options.right = OptionRight::Put;
        strategy.options.strikes_above = 1;

        let err = buy(&mut portfolio, &mut market, &strategy, "PENY", day, open()).unwrap_err();
        assert!(matches!(err, TickReplayError::DataUnavailable { .. }));
        assert_eq!(market.options().fetch_count(), 0);
    }
}
