//! Positions and holdings.
//!
//! A [`Holding`] groups every position that shares an underlying name. Equity
//! and crypto holdings carry a single position keyed by the ticker; option
//! holdings carry one position per contract symbol, which is how both legs of
//! a spread live side by side.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::option_symbol::OptionContract;

/// Shares represented by one option contract.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Equity,
    Crypto,
    Option,
}

impl AssetClass {
    pub fn multiplier(self) -> f64 {
        match self {
            AssetClass::Option => CONTRACT_MULTIPLIER,
            AssetClass::Equity | AssetClass::Crypto => 1.0,
        }
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equity" | "stock" => Ok(AssetClass::Equity),
            "crypto" => Ok(AssetClass::Crypto),
            "option" | "options" => Ok(AssetClass::Option),
            other => Err(format!(
                "unrecognized asset class '{}' (expected equity, crypto or option)",
                other
            )),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Equity => write!(f, "equity"),
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Option => write!(f, "option"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Ticker for equities and crypto, OCC symbol for options.
    pub id: String,
    pub underlying: String,
    /// Signed; negative means sold to open.
    pub quantity: f64,
    /// Average fill price per unit, always non-negative.
    pub avg_cost: f64,
    pub asset_class: AssetClass,
    pub opened: NaiveDate,
    pub contract: Option<OptionContract>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Signed value at `price`, scaled by the contract multiplier.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price * self.asset_class.multiplier()
    }

    /// Current price relative to the average cost.
    pub fn cost_ratio(&self, price: f64) -> Option<f64> {
        let basis = self.avg_cost.abs();
        if basis > 0.0 { Some(price / basis) } else { None }
    }

    /// Long positions profit above cost, short positions below it.
    pub fn is_in_profit(&self, price: f64) -> bool {
        if self.is_short() {
            price < self.avg_cost
        } else {
            price > self.avg_cost
        }
    }

    /// Merge a signed lot. Same-side lots reweight the cost basis; an
    /// opposite lot reduces the position at its existing basis, and one that
    /// flips the side starts a new basis at `price`.
    pub fn add_fill(&mut self, quantity: f64, price: f64) {
        let new_quantity = self.quantity + quantity;
        if self.quantity == 0.0 || self.quantity.signum() == quantity.signum() {
            if new_quantity != 0.0 {
                self.avg_cost = (self.quantity * self.avg_cost + quantity * price) / new_quantity;
            }
        } else if new_quantity != 0.0 && new_quantity.signum() != self.quantity.signum() {
            self.avg_cost = price;
        }
        self.quantity = new_quantity;
    }

    pub fn is_expired(&self, date: NaiveDate) -> bool {
        self.contract
            .as_ref()
            .is_some_and(|contract| contract.expiration < date)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Holding {
    pub underlying: String,
    pub positions: BTreeMap<String, Position>,
}

impl Holding {
    pub fn new(underlying: impl Into<String>) -> Self {
        Holding {
            underlying: underlying.into(),
            positions: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn long_legs(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_long())
    }

    pub fn short_legs(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_short())
    }
}

impl fmt::Display for Holding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let legs: Vec<String> = self
            .positions
            .values()
            .map(|p| format!("{} x{} @ {:.2}", p.id, p.quantity, p.avg_cost))
            .collect();
        write!(f, "{}: [{}]", self.underlying, legs.join(", "))
    }
}
