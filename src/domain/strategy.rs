//! Strategy configuration, sizing and cooldown.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::condition::{Condition, EvalContext};
use super::error::TickReplayError;
use super::market::MarketData;
use super::option_symbol::OptionRight;
use super::position::AssetClass;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allocation {
    /// Fixed units or contracts. Negative contract counts sell to open.
    Units(i64),
    Fraction(f64),
}

impl FromStr for Allocation {
    type Err = String;

    /// Integers are unit counts, anything with a decimal point is a fraction.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(units) = s.parse::<i64>() {
            return Ok(Allocation::Units(units));
        }
        match s.parse::<f64>() {
            Ok(fraction) if fraction.is_finite() => Ok(Allocation::Fraction(fraction)),
            _ => Err(format!("allocation '{}' is not a number", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationBasis {
    PercentPortfolio,
    PercentBuyingPower,
}

impl FromStr for AllocationBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "percent_portfolio" => Ok(AllocationBasis::PercentPortfolio),
            "percent_bp" | "percent_buying_power" => Ok(AllocationBasis::PercentBuyingPower),
            other => Err(format!(
                "unrecognized allocation type '{}' (expected percent_portfolio or percent_bp)",
                other
            )),
        }
    }
}

/// When sells are allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfitGate {
    Off,
    /// Sell only while the whole portfolio is above its initial value.
    Portfolio,
    /// Sell only positions that are above their own cost basis.
    Position,
}

impl FromStr for ProfitGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" => Ok(ProfitGate::Off),
            "portfolio" => Ok(ProfitGate::Portfolio),
            "position" => Ok(ProfitGate::Position),
            other => Err(format!(
                "unrecognized profit gate '{}' (expected off, portfolio or position)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionParams {
    pub right: OptionRight,
    pub strikes_above: i32,
    pub spread: bool,
}

impl Default for OptionParams {
    fn default() -> Self {
        OptionParams {
            right: OptionRight::Call,
            strikes_above: 0,
            spread: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: String,
    pub universe: Vec<String>,
    pub buying: Condition,
    pub selling: Option<Condition>,
    pub buying_allocation: Allocation,
    pub buying_basis: AllocationBasis,
    pub selling_allocation: Allocation,
    pub max_allocation: f64,
    pub min_allocation: f64,
    pub buying_delay: i64,
    pub selling_delay: i64,
    pub asset_class: AssetClass,
    pub profit_gate: ProfitGate,
    pub options: OptionParams,
}

impl Strategy {
    /// A strategy with permissive defaults: one unit per buy, full sells,
    /// no cooldown and no allocation bounds.
    pub fn new(name: impl Into<String>, universe: Vec<String>, buying: Condition) -> Self {
        Strategy {
            name: name.into(),
            universe,
            buying,
            selling: None,
            buying_allocation: Allocation::Units(1),
            buying_basis: AllocationBasis::PercentPortfolio,
            selling_allocation: Allocation::Fraction(1.0),
            max_allocation: 1.0,
            min_allocation: 0.0,
            buying_delay: 0,
            selling_delay: 0,
            asset_class: AssetClass::Equity,
            profit_gate: ProfitGate::Off,
            options: OptionParams::default(),
        }
    }

    /// Assets in the universe whose buying condition matches now.
    pub fn buying_conditions_are_met(
        &mut self,
        ctx: &EvalContext<'_>,
    ) -> Result<(bool, BTreeSet<String>), TickReplayError> {
        let mut affected = BTreeSet::new();
        for asset in &self.universe {
            let result = match self.buying.evaluate(ctx, asset) {
                Ok(result) => result,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(asset = %asset, error = %e, "skipping buy evaluation");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if result.matched {
                affected.insert(asset.clone());
            }
        }
        Ok((!affected.is_empty(), affected))
    }

    /// Holdings or positions whose selling condition matches now. Never
    /// matches while `is_profitable` is false.
    pub fn selling_conditions_are_met(
        &mut self,
        ctx: &EvalContext<'_>,
        is_profitable: bool,
    ) -> Result<(bool, BTreeSet<String>), TickReplayError> {
        let mut affected = BTreeSet::new();
        if !is_profitable {
            return Ok((false, affected));
        }
        let Some(selling) = self.selling.as_mut() else {
            return Ok((false, affected));
        };

        let held: Vec<String> = ctx.portfolio.holdings().keys().cloned().collect();
        for asset in held {
            let result = match selling.evaluate(ctx, &asset) {
                Ok(result) => result,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(asset = %asset, error = %e, "skipping sell evaluation");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !result.matched {
                continue;
            }
            match result.positions {
                Some(positions) => affected.extend(positions),
                None => {
                    affected.insert(asset);
                }
            }
        }
        Ok((!affected.is_empty(), affected))
    }

    pub fn advance_windows(
        &mut self,
        market: &MarketData,
        date: NaiveDate,
    ) -> Result<(), TickReplayError> {
        self.buying.advance_windows(market, date)?;
        if let Some(selling) = self.selling.as_mut() {
            selling.advance_windows(market, date)?;
        }
        Ok(())
    }

    pub fn clear_matches(&mut self) {
        self.buying.clear_matches();
        if let Some(selling) = self.selling.as_mut() {
            selling.clear_matches();
        }
    }
}

/// Quantity to trade at `price`.
///
/// Units are taken as given. Fractions size against the portfolio value or
/// buying power; equities and option contracts floor to whole units, crypto
/// keeps the fraction.
pub fn sizing(
    asset_class: AssetClass,
    allocation: Allocation,
    basis: AllocationBasis,
    portfolio_value: f64,
    buying_power: f64,
    price: f64,
) -> f64 {
    match allocation {
        Allocation::Units(units) => units as f64,
        Allocation::Fraction(fraction) => {
            let budget = match basis {
                AllocationBasis::PercentPortfolio => fraction * portfolio_value,
                AllocationBasis::PercentBuyingPower => fraction * buying_power,
            };
            let unit_cost = price * asset_class.multiplier();
            if unit_cost <= 0.0 {
                return 0.0;
            }
            let quantity = budget / unit_cost;
            match asset_class {
                AssetClass::Crypto => quantity,
                AssetClass::Equity | AssetClass::Option => quantity.floor(),
            }
        }
    }
}

/// True when no prior action exists or `delay_days` have passed since it.
pub fn cooldown_elapsed(last_action: Option<NaiveDate>, delay_days: i64, today: NaiveDate) -> bool {
    last_action.is_none_or(|last| last + Duration::days(delay_days) <= today)
}
