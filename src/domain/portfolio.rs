//! Portfolio ledger: buying power, fee and holdings.
//!
//! Buying power only moves through [`Portfolio::decrease_buying_power`] and
//! [`Portfolio::increase_buying_power`], both of which charge the fee.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

use super::clock::Tick;
use super::error::TickReplayError;
use super::market::MarketData;
use super::option_symbol::OptionContract;
use super::position::{AssetClass, Holding, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    buying_power: f64,
    initial_value: f64,
    fee: f64,
    holdings: BTreeMap<String, Holding>,
}

/// A lot being added to the ledger.
#[derive(Debug, Clone)]
pub struct Lot {
    pub id: String,
    pub underlying: String,
    pub quantity: f64,
    pub price: f64,
    pub asset_class: AssetClass,
    pub date: NaiveDate,
    pub contract: Option<OptionContract>,
}

impl Portfolio {
    pub fn new(initial_value: f64, fee: f64) -> Self {
        Portfolio {
            buying_power: initial_value,
            initial_value,
            fee,
            holdings: BTreeMap::new(),
        }
    }

    pub fn buying_power(&self) -> f64 {
        self.buying_power
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn holdings(&self) -> &BTreeMap<String, Holding> {
        &self.holdings
    }

    pub fn holding(&self, underlying: &str) -> Option<&Holding> {
        self.holdings.get(underlying)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.holdings.values().flat_map(|h| h.positions.values())
    }

    pub fn find_position(&self, id: &str) -> Option<&Position> {
        self.positions().find(|p| p.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Spend `amount` plus the fee.
    pub fn decrease_buying_power(&mut self, amount: f64) {
        self.buying_power -= amount + self.fee;
    }

    /// Receive `amount` less the fee.
    pub fn increase_buying_power(&mut self, amount: f64) {
        self.buying_power += amount - self.fee;
    }

    /// Add a lot, creating the holding and position if needed and merging
    /// into the existing position otherwise. A merge that nets to zero
    /// removes the position, and the holding once it is empty.
    pub fn add_lot(&mut self, lot: Lot) {
        let holding = self
            .holdings
            .entry(lot.underlying.clone())
            .or_insert_with(|| Holding::new(lot.underlying.clone()));

        match holding.positions.get_mut(&lot.id) {
            Some(position) => {
                position.add_fill(lot.quantity, lot.price);
                let flat = position.quantity == 0.0;
                if flat {
                    holding.positions.remove(&lot.id);
                    if holding.is_empty() {
                        self.holdings.remove(&lot.underlying);
                    }
                }
            }
            None => {
                holding.positions.insert(
                    lot.id.clone(),
                    Position {
                        id: lot.id,
                        underlying: lot.underlying,
                        quantity: lot.quantity,
                        avg_cost: lot.price,
                        asset_class: lot.asset_class,
                        opened: lot.date,
                        contract: lot.contract,
                    },
                );
            }
        }
    }

    /// Move a position's quantity toward zero by `quantity` units. Removes the
    /// position at zero and the holding when it has no positions left.
    /// Returns the signed quantity closed.
    pub fn reduce_position(&mut self, id: &str, quantity: f64) -> Result<f64, TickReplayError> {
        let not_held = || TickReplayError::NotHeld {
            asset: id.to_string(),
        };
        let underlying = self
            .find_position(id)
            .map(|p| p.underlying.clone())
            .ok_or_else(not_held)?;
        let holding = self.holdings.get_mut(&underlying).ok_or_else(not_held)?;
        let position = holding.positions.get_mut(id).ok_or_else(not_held)?;

        let closed = quantity.min(position.quantity.abs()) * position.quantity.signum();
        position.quantity -= closed;

        if position.quantity == 0.0 {
            holding.positions.remove(id);
        }
        if holding.is_empty() {
            self.holdings.remove(&underlying);
        }
        Ok(closed)
    }

    /// Position ids addressed by `target`: every position of a holding when
    /// `target` names an underlying, otherwise the single matching position.
    pub fn positions_for(&self, target: &str) -> Result<Vec<String>, TickReplayError> {
        if let Some(holding) = self.holdings.get(target) {
            return Ok(holding.positions.keys().cloned().collect());
        }
        self.find_position(target)
            .map(|p| vec![p.id.clone()])
            .ok_or_else(|| TickReplayError::NotHeld {
                asset: target.to_string(),
            })
    }

    pub fn position_value(
        &self,
        market: &MarketData,
        position: &Position,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let price = market.price(&position.id, date, tick)?;
        Ok(position.market_value(price))
    }

    /// Net signed value of everything held under `underlying`.
    pub fn exposure(
        &self,
        market: &MarketData,
        underlying: &str,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let Some(holding) = self.holdings.get(underlying) else {
            return Ok(0.0);
        };
        holding
            .positions
            .values()
            .map(|p| self.position_value(market, p, date, tick))
            .sum()
    }

    /// Sum of absolute position values under `underlying`.
    pub fn gross_exposure(
        &self,
        market: &MarketData,
        underlying: &str,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let Some(holding) = self.holdings.get(underlying) else {
            return Ok(0.0);
        };
        let mut gross = 0.0;
        for position in holding.positions.values() {
            gross += self.position_value(market, position, date, tick)?.abs();
        }
        Ok(gross)
    }

    pub fn get_portfolio_value(
        &self,
        market: &MarketData,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let mut value = self.buying_power;
        for position in self.positions() {
            value += self.position_value(market, position, date, tick)?;
        }
        Ok(value)
    }

    pub fn is_profitable(
        &self,
        market: &MarketData,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<bool, TickReplayError> {
        Ok(self.get_portfolio_value(market, date, tick)? > self.initial_value)
    }

    /// Add a starting holding worth `dollars` at the current price. The
    /// holding is a gift to the ledger: buying power is untouched and the
    /// initial value grows by the holding's cost.
    pub fn seed_holding(
        &mut self,
        market: &MarketData,
        underlying: &str,
        asset_class: AssetClass,
        dollars: f64,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let price = market.price(underlying, date, tick)?;
        let mut quantity = dollars / price;
        if asset_class == AssetClass::Equity {
            quantity = quantity.floor();
        }
        if quantity <= 0.0 {
            return Ok(0.0);
        }

        self.add_lot(Lot {
            id: underlying.to_string(),
            underlying: underlying.to_string(),
            quantity,
            price,
            asset_class,
            date,
            contract: None,
        });
        self.initial_value += quantity * price;
        Ok(quantity)
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holdings: Vec<String> = self.holdings.values().map(|h| h.to_string()).collect();
        write!(f, "{{{}}}", holdings.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::Resolution;
    use crate::domain::ohlcv::{OhlcvBar, PriceSeries};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn market(close: f64) -> MarketData {
        MarketData::new(vec![PriceSeries::from_daily(
            "BHP",
            vec![OhlcvBar {
                date: date(15),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            }],
        )])
    }

    fn lot(quantity: f64, price: f64) -> Lot {
        Lot {
            id: "BHP".into(),
            underlying: "BHP".into(),
            quantity,
            price,
            asset_class: AssetClass::Equity,
            date: date(15),
            contract: None,
        }
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(100000.0, 5.0);
        assert!((portfolio.buying_power() - 100000.0).abs() < f64::EPSILON);
        assert!((portfolio.initial_value() - 100000.0).abs() < f64::EPSILON);
        assert!(portfolio.is_empty());
    }

    #[test]
    fn buying_power_changes_always_charge_fee() {
        let mut portfolio = Portfolio::new(10000.0, 5.0);
        portfolio.decrease_buying_power(100.0);
        assert!((portfolio.buying_power() - 9895.0).abs() < f64::EPSILON);
        portfolio.increase_buying_power(100.0);
        assert!((portfolio.buying_power() - 9990.0).abs() < f64::EPSILON);
    }

    #[test]
    fn add_lot_merges_and_reweights() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(10.0, 100.0));
        portfolio.add_lot(lot(10.0, 110.0));
        let pos = portfolio.find_position("BHP").unwrap();
        assert_eq!(pos.quantity, 20.0);
        assert!((pos.avg_cost - 105.0).abs() < f64::EPSILON);
        assert_eq!(portfolio.holdings().len(), 1);
    }

    #[test]
    fn opposite_lot_netting_to_zero_removes_holding() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(1.0, 3.0));
        portfolio.add_lot(lot(-1.0, 2.0));
        assert!(portfolio.find_position("BHP").is_none());
        assert!(portfolio.is_empty());
    }

    #[test]
    fn opposite_lot_flipping_side_restarts_basis() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(2.0, 3.0));
        portfolio.add_lot(lot(-5.0, 2.0));
        let pos = portfolio.find_position("BHP").unwrap();
        assert_eq!(pos.quantity, -3.0);
        assert!((pos.avg_cost - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gross_exposure_ignores_sign() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(-4.0, 50.0));
        let m = market(50.0);
        let net = portfolio.exposure(&m, "BHP", date(15), Tick::close()).unwrap();
        let gross = portfolio.gross_exposure(&m, "BHP", date(15), Tick::close()).unwrap();
        assert!((net + 200.0).abs() < f64::EPSILON);
        assert!((gross - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reducing_to_zero_removes_holding() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(10.0, 100.0));
        let closed = portfolio.reduce_position("BHP", 4.0).unwrap();
        assert_eq!(closed, 4.0);
        assert_eq!(portfolio.find_position("BHP").unwrap().quantity, 6.0);

        let closed = portfolio.reduce_position("BHP", 50.0).unwrap();
        assert_eq!(closed, 6.0);
        assert!(portfolio.holding("BHP").is_none());
    }

    #[test]
    fn reducing_short_returns_negative_quantity() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(-3.0, 100.0));
        let closed = portfolio.reduce_position("BHP", 1.0).unwrap();
        assert_eq!(closed, -1.0);
        assert_eq!(portfolio.find_position("BHP").unwrap().quantity, -2.0);
    }

    #[test]
    fn reducing_unknown_position_is_not_held() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        let err = portfolio.reduce_position("XYZ", 1.0).unwrap_err();
        assert!(matches!(err, TickReplayError::NotHeld { .. }));
        assert!(portfolio.positions_for("XYZ").is_err());
    }

    #[test]
    fn portfolio_value_marks_positions() {
        let mut portfolio = Portfolio::new(10000.0, 0.0);
        portfolio.add_lot(lot(10.0, 100.0));
        portfolio.decrease_buying_power(1000.0);

        let market = market(110.0);
        let value = portfolio
            .get_portfolio_value(&market, date(15), Tick::close())
            .unwrap();
        assert!((value - 10100.0).abs() < f64::EPSILON);
        assert!(
            portfolio
                .is_profitable(&market, date(15), Tick::close())
                .unwrap()
        );
    }

    #[test]
    fn seed_holding_raises_initial_value() {
        let mut portfolio = Portfolio::new(1000.0, 5.0);
        let market = market(40.0);
        let qty = portfolio
            .seed_holding(
                &market,
                "BHP",
                AssetClass::Equity,
                1000.0,
                date(15),
                Tick::open(Resolution::Daily),
            )
            .unwrap();
        assert_eq!(qty, 25.0);
        assert!((portfolio.initial_value() - 2000.0).abs() < f64::EPSILON);
        assert!((portfolio.buying_power() - 1000.0).abs() < f64::EPSILON);
    }
}
