//! Option contract selection and symbol formatting.
//!
//! Symbols follow the OCC layout used by the history endpoint:
//! `{UNDERLYING}{YY}{MM}{DD}{C|P}{strike x 1000, zero-padded to 8 digits}`,
//! e.g. `CHGG200320C00040000`.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::fmt;
use std::str::FromStr;

/// Minimum days to expiration before rolling to the next month's contract.
pub const MIN_DAYS_TO_EXPIRATION: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub fn code(self) -> char {
        match self {
            OptionRight::Call => 'C',
            OptionRight::Put => 'P',
        }
    }
}

impl FromStr for OptionRight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" => Ok(OptionRight::Call),
            "P" | "PUT" => Ok(OptionRight::Put),
            other => Err(format!("unrecognized option type '{}' (expected C or P)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionContract {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub right: OptionRight,
    pub strike: f64,
}

impl OptionContract {
    pub fn symbol(&self) -> String {
        let thousandths = (self.strike * 1000.0).round() as u64;
        format!(
            "{}{:02}{:02}{:02}{}{:08}",
            self.underlying,
            self.expiration.year() % 100,
            self.expiration.month(),
            self.expiration.day(),
            self.right.code(),
            thousandths
        )
    }

    /// Parse an OCC-style symbol back into its parts.
    pub fn parse(symbol: &str) -> Option<OptionContract> {
        let split = symbol.find(|c: char| c.is_ascii_digit())?;
        let (underlying, rest) = symbol.split_at(split);
        if underlying.is_empty() || rest.len() != 15 || !rest.is_ascii() {
            return None;
        }

        let yy: i32 = rest[0..2].parse().ok()?;
        let mm: u32 = rest[2..4].parse().ok()?;
        let dd: u32 = rest[4..6].parse().ok()?;
        let right = match &rest[6..7] {
            "C" => OptionRight::Call,
            "P" => OptionRight::Put,
            _ => return None,
        };
        let thousandths: u64 = rest[7..].parse().ok()?;

        Some(OptionContract {
            underlying: underlying.to_string(),
            expiration: NaiveDate::from_ymd_opt(2000 + yy, mm, dd)?,
            right,
            strike: thousandths as f64 / 1000.0,
        })
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

/// Strike spacing for an underlying trading at `price`.
pub fn strike_band(price: f64) -> f64 {
    if price < 20.0 {
        1.0
    } else if price < 100.0 {
        5.0
    } else {
        10.0
    }
}

/// Round `price` to the listed strike `strikes_above` bands away from the
/// money. Puts count bands downward.
pub fn round_strike(price: f64, strikes_above: i32, right: OptionRight) -> f64 {
    let offset = match right {
        OptionRight::Call => strikes_above,
        OptionRight::Put => -strikes_above,
    } as f64;
    let band = strike_band(price);
    band * ((price + band * offset) / band).round()
}

pub fn third_friday(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Fri, 3)
}

/// Third Friday of `date`'s month, or of the following month when fewer than
/// [`MIN_DAYS_TO_EXPIRATION`] days remain.
pub fn target_expiration(date: NaiveDate) -> Option<NaiveDate> {
    let this_month = third_friday(date.year(), date.month())?;
    if this_month - date >= Duration::days(MIN_DAYS_TO_EXPIRATION) {
        return Some(this_month);
    }
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    third_friday(year, month)
}

/// The contract a strategy would open on `date` with the underlying at `price`.
/// `None` when no expiration exists or the strike rounds to zero or below.
pub fn contract_for(
    underlying: &str,
    price: f64,
    date: NaiveDate,
    strikes_above: i32,
    right: OptionRight,
) -> Option<OptionContract> {
    let strike = round_strike(price, strikes_above, right);
    if strike <= 0.0 {
        return None;
    }
    Some(OptionContract {
        underlying: underlying.to_string(),
        expiration: target_expiration(date)?,
        right,
        strike,
    })
}
