//! Configuration validation.
//!
//! Every field is checked before the first tick so a bad config never
//! produces a partial run.

use crate::domain::clock::Resolution;
use crate::domain::condition_parser;
use crate::domain::error::TickReplayError;
use crate::domain::option_symbol::OptionRight;
use crate::domain::position::AssetClass;
use crate::domain::strategy::{Allocation, AllocationBasis, ProfitGate};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    validate_initial_capital(config)?;
    validate_fee(config)?;
    validate_dates(config)?;
    resolution(config)?;
    validate_benchmark(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    validate_assets(config)?;
    let class = asset_class(config)?;
    validate_conditions(config)?;
    validate_allocations(config)?;
    validate_allocation_bounds(config)?;
    validate_delays(config)?;
    profit_gate(config)?;
    validate_option_params(config, class)?;
    Ok(())
}

pub fn validate_initial_holdings(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    initial_holdings(config).map(|_| ())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TickReplayError {
    TickReplayError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> TickReplayError {
    TickReplayError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let value = config.get_double("backtest", "initial_capital", 0.0);
    if value <= 0.0 || !value.is_finite() {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_fee(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let value = config.get_double("backtest", "fee", 0.0);
    if value < 0.0 || !value.is_finite() {
        return Err(invalid("backtest", "fee", "fee must be non-negative"));
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let start_date = parse_date(config.get_string("backtest", "start_date").as_deref(), "start_date")?;
    let end_date = parse_date(config.get_string("backtest", "end_date").as_deref(), "end_date")?;

    if start_date > end_date {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    Ok(())
}

pub fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, TickReplayError> {
    match value {
        None => Err(missing("backtest", field)),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            invalid(
                "backtest",
                field,
                format!("invalid {} format, expected YYYY-MM-DD", field),
            )
        }),
    }
}

/// Defaults to daily when the key is absent.
pub fn resolution(config: &dyn ConfigPort) -> Result<Resolution, TickReplayError> {
    match non_empty(config, "backtest", "resolution") {
        None => Ok(Resolution::Daily),
        Some(s) => s
            .parse::<Resolution>()
            .map_err(|e| invalid("backtest", "resolution", e)),
    }
}

fn validate_benchmark(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    match non_empty(config, "backtest", "benchmark") {
        None => Ok(()),
        Some(s) => parse_benchmark(&s)
            .map(|_| ())
            .map_err(|e| invalid("backtest", "benchmark", e)),
    }
}

/// Parses `SPY:0.6, QQQ:0.4`. A bare symbol carries weight 1.
pub fn parse_benchmark(value: &str) -> Result<Vec<(String, f64)>, String> {
    let mut weights = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (symbol, weight) = match entry.split_once(':') {
            Some((symbol, weight)) => {
                let weight = weight
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("weight for '{}' is not a number", symbol.trim()))?;
                (symbol.trim(), weight)
            }
            None => (entry, 1.0),
        };
        if symbol.is_empty() {
            return Err(format!("entry '{}' has no symbol", entry));
        }
        if weight <= 0.0 || !weight.is_finite() {
            return Err(format!("weight for '{}' must be positive", symbol));
        }
        weights.push((symbol.to_uppercase(), weight));
    }
    if weights.is_empty() {
        return Err("benchmark lists no symbols".to_string());
    }
    Ok(weights)
}

/// Comma separated, upper-cased, duplicates dropped in first-seen order.
pub fn parse_assets(value: &str) -> Vec<String> {
    let mut assets: Vec<String> = Vec::new();
    for asset in value.split(',').map(|a| a.trim().to_uppercase()) {
        if !asset.is_empty() && !assets.contains(&asset) {
            assets.push(asset);
        }
    }
    assets
}

fn validate_assets(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    match non_empty(config, "strategy", "assets") {
        Some(s) if !parse_assets(&s).is_empty() => Ok(()),
        _ => Err(missing("strategy", "assets")),
    }
}

pub fn asset_class(config: &dyn ConfigPort) -> Result<AssetClass, TickReplayError> {
    match non_empty(config, "strategy", "asset_class") {
        None => Ok(AssetClass::Equity),
        Some(s) => s
            .parse::<AssetClass>()
            .map_err(|e| invalid("strategy", "asset_class", e)),
    }
}

fn validate_conditions(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let buy_when = non_empty(config, "strategy", "buy_when").ok_or_else(|| missing("strategy", "buy_when"))?;
    condition_parser::parse(&buy_when)?;

    if let Some(sell_when) = non_empty(config, "strategy", "sell_when") {
        condition_parser::parse(&sell_when)?;
    }
    Ok(())
}

pub fn allocation(
    config: &dyn ConfigPort,
    key: &str,
    default: Allocation,
) -> Result<Allocation, TickReplayError> {
    match non_empty(config, "strategy", key) {
        None => Ok(default),
        Some(s) => {
            let parsed = s
                .parse::<Allocation>()
                .map_err(|e| invalid("strategy", key, e))?;
            if matches!(parsed, Allocation::Fraction(f) if f <= 0.0 || f > 1.0) {
                return Err(invalid(
                    "strategy",
                    key,
                    "fractional allocation must be in (0, 1]",
                ));
            }
            Ok(parsed)
        }
    }
}

pub fn allocation_basis(config: &dyn ConfigPort) -> Result<AllocationBasis, TickReplayError> {
    match non_empty(config, "strategy", "buying_allocation_type") {
        None => Ok(AllocationBasis::PercentPortfolio),
        Some(s) => s
            .parse::<AllocationBasis>()
            .map_err(|e| invalid("strategy", "buying_allocation_type", e)),
    }
}

fn validate_allocations(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let buying = allocation(config, "buying_allocation", Allocation::Units(1))?;
    if buying == Allocation::Units(0) {
        return Err(invalid(
            "strategy",
            "buying_allocation",
            "buying_allocation must not be zero",
        ));
    }
    allocation_basis(config)?;
    let selling = allocation(config, "selling_allocation", Allocation::Fraction(1.0))?;
    if matches!(selling, Allocation::Units(units) if units <= 0) {
        return Err(invalid(
            "strategy",
            "selling_allocation",
            "selling_allocation must be positive",
        ));
    }
    Ok(())
}

fn validate_allocation_bounds(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    let max = config.get_double("strategy", "maximum_allocation", 1.0);
    if max <= 0.0 || max > 1.0 {
        return Err(invalid(
            "strategy",
            "maximum_allocation",
            "maximum_allocation must be between 0 and 1",
        ));
    }
    let min = config.get_double("strategy", "minimum_allocation", 0.0);
    if min < 0.0 || min >= max {
        return Err(invalid(
            "strategy",
            "minimum_allocation",
            "minimum_allocation must be non-negative and below maximum_allocation",
        ));
    }
    Ok(())
}

fn validate_delays(config: &dyn ConfigPort) -> Result<(), TickReplayError> {
    for key in ["buying_delay", "selling_delay"] {
        if config.get_int("strategy", key, 0) < 0 {
            return Err(invalid("strategy", key, format!("{} must be non-negative", key)));
        }
    }
    Ok(())
}

/// An explicit `profit_gate` wins; otherwise `must_be_profitable_to_sell`
/// selects the portfolio-wide gate.
pub fn profit_gate(config: &dyn ConfigPort) -> Result<ProfitGate, TickReplayError> {
    match non_empty(config, "strategy", "profit_gate") {
        Some(s) => s
            .parse::<ProfitGate>()
            .map_err(|e| invalid("strategy", "profit_gate", e)),
        None if config.get_bool("strategy", "must_be_profitable_to_sell", false) => {
            Ok(ProfitGate::Portfolio)
        }
        None => Ok(ProfitGate::Off),
    }
}

pub fn option_right(config: &dyn ConfigPort) -> Result<OptionRight, TickReplayError> {
    match non_empty(config, "strategy", "option_type") {
        None => Ok(OptionRight::Call),
        Some(s) => s
            .parse::<OptionRight>()
            .map_err(|e| invalid("strategy", "option_type", e)),
    }
}

pub fn strikes_above(config: &dyn ConfigPort) -> Result<i32, TickReplayError> {
    match non_empty(config, "strategy", "strikes_above") {
        None => Ok(0),
        Some(s) => s
            .parse::<i32>()
            .map_err(|_| invalid("strategy", "strikes_above", "strikes_above must be an integer")),
    }
}

fn validate_option_params(
    config: &dyn ConfigPort,
    class: AssetClass,
) -> Result<(), TickReplayError> {
    option_right(config)?;
    strikes_above(config)?;

    if class == AssetClass::Option && resolution(config)? != Resolution::Daily {
        return Err(invalid(
            "backtest",
            "resolution",
            "option strategies require daily resolution",
        ));
    }
    if class != AssetClass::Option && config.get_bool("strategy", "spread", false) {
        return Err(invalid(
            "strategy",
            "spread",
            "spread requires asset_class = option",
        ));
    }
    Ok(())
}

/// `[initial_holdings]` as (symbol, dollars) in file order.
pub fn initial_holdings(config: &dyn ConfigPort) -> Result<Vec<(String, f64)>, TickReplayError> {
    let mut holdings = Vec::new();
    for key in config.keys("initial_holdings") {
        let raw = config.get_string("initial_holdings", &key).unwrap_or_default();
        let dollars = raw.trim().parse::<f64>().map_err(|_| {
            invalid("initial_holdings", &key, "holding value must be a number")
        })?;
        if dollars <= 0.0 || !dollars.is_finite() {
            return Err(invalid(
                "initial_holdings",
                &key,
                "holding value must be positive",
            ));
        }
        holdings.push((key.to_uppercase(), dollars));
    }
    Ok(holdings)
}
