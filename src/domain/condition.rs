//! Buy and sell conditions.
//!
//! A [`Condition`] is evaluated per underlying and answers with a
//! [`ConditionMatch`]: whether it matched and, for conditions that scan the
//! portfolio, which positions it matched. Two families exist:
//!
//! - Rolling-window conditions keep the trailing `week_length` daily closes
//!   per asset. The window is warmed on first evaluation and advanced once at
//!   the end of each trading day.
//! - Holdings-scanning conditions inspect the positions held under the asset
//!   and remember what they matched until [`Condition::clear_matches`].
//!
//! `All` and `Any` combine conditions. Both are false when empty.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use super::clock::Tick;
use super::error::TickReplayError;
use super::market::MarketData;
use super::portfolio::Portfolio;
use super::position::Position;

/// What a condition sees while it is evaluated.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub market: &'a MarketData,
    pub portfolio: &'a Portfolio,
    pub date: NaiveDate,
    pub tick: Tick,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionMatch {
    pub matched: bool,
    /// `None` means the whole asset is affected; `Some` narrows to positions.
    pub positions: Option<BTreeSet<String>>,
}

impl ConditionMatch {
    pub fn no_match() -> Self {
        ConditionMatch::default()
    }

    fn asset(matched: bool) -> Self {
        ConditionMatch {
            matched,
            positions: None,
        }
    }

    fn narrowed(positions: BTreeSet<String>) -> Self {
        ConditionMatch {
            matched: !positions.is_empty(),
            positions: Some(positions),
        }
    }
}

/// Trailing daily closes per asset.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    pub week_length: usize,
    pub sd: f64,
    windows: BTreeMap<String, VecDeque<f64>>,
}

impl RollingWindow {
    pub fn new(week_length: usize, sd: f64) -> Self {
        RollingWindow {
            week_length,
            sd,
            windows: BTreeMap::new(),
        }
    }

    pub fn window(&self, asset: &str) -> Option<&VecDeque<f64>> {
        self.windows.get(asset)
    }

    /// Fill the window from the closes strictly before `date`.
    fn warm(
        &mut self,
        market: &MarketData,
        asset: &str,
        date: NaiveDate,
    ) -> Result<&VecDeque<f64>, TickReplayError> {
        if !self.windows.contains_key(asset) {
            let series = market
                .series(asset)
                .ok_or_else(|| TickReplayError::DataUnavailable {
                    symbol: asset.to_string(),
                    reason: "no series loaded".into(),
                })?;
            let mut closes: VecDeque<f64> = series
                .bars_before(date)
                .take(self.week_length)
                .map(|bar| bar.close)
                .collect();
            if closes.len() < self.week_length {
                return Err(TickReplayError::InsufficientHistory {
                    asset: asset.to_string(),
                    date,
                    rows: closes.len(),
                    needed: self.week_length,
                });
            }
            closes.make_contiguous().reverse();
            debug!(asset, %date, len = closes.len(), "warmed rolling window");
            self.windows.insert(asset.to_string(), closes);
        }
        self.windows
            .get(asset)
            .ok_or_else(|| TickReplayError::WindowInvariant {
                asset: asset.to_string(),
                len: 0,
                expected: self.week_length,
            })
    }

    /// Pop the oldest close and push `close`.
    pub fn push(&mut self, asset: &str, close: f64) -> Result<(), TickReplayError> {
        let expected = self.week_length;
        let window = self
            .windows
            .get_mut(asset)
            .ok_or_else(|| TickReplayError::WindowInvariant {
                asset: asset.to_string(),
                len: 0,
                expected,
            })?;
        window.pop_front();
        window.push_back(close);
        if window.len() != expected {
            return Err(TickReplayError::WindowInvariant {
                asset: asset.to_string(),
                len: window.len(),
                expected,
            });
        }
        Ok(())
    }

    /// End-of-day maintenance for every warmed asset.
    pub fn advance(&mut self, market: &MarketData, date: NaiveDate) -> Result<(), TickReplayError> {
        let assets: Vec<String> = self.windows.keys().cloned().collect();
        for asset in assets {
            match market.series(&asset).and_then(|s| s.bar(date)) {
                Some(bar) => {
                    let close = bar.close;
                    self.push(&asset, close)?;
                }
                None => debug!(asset = %asset, %date, "no bar today; window unchanged"),
            }
        }
        Ok(())
    }
}

/// Sample standard deviation; zero for fewer than two values.
pub fn sample_std(values: &VecDeque<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    LowForPeriod(RollingWindow),
    HighForPeriod(RollingWindow),
    DownNPercent {
        fraction: f64,
        matched: BTreeSet<String>,
    },
    UpNPercent {
        fraction: f64,
        matched: BTreeSet<String>,
    },
    SoldToOpen {
        matched: BTreeSet<String>,
    },
    MoreBuyToOpen {
        matched: BTreeSet<String>,
    },
    NegaEndUpNPercent {
        fraction: f64,
        matched: BTreeSet<String>,
    },
    PosaEndBooming {
        fraction: f64,
        matched: BTreeSet<String>,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn low_for_period(week_length: usize, sd: f64) -> Self {
        Condition::LowForPeriod(RollingWindow::new(week_length, sd))
    }

    pub fn high_for_period(week_length: usize, sd: f64) -> Self {
        Condition::HighForPeriod(RollingWindow::new(week_length, sd))
    }

    pub fn down_n_percent(fraction: f64) -> Self {
        Condition::DownNPercent {
            fraction,
            matched: BTreeSet::new(),
        }
    }

    pub fn up_n_percent(fraction: f64) -> Self {
        Condition::UpNPercent {
            fraction,
            matched: BTreeSet::new(),
        }
    }

    pub fn sold_to_open() -> Self {
        Condition::SoldToOpen {
            matched: BTreeSet::new(),
        }
    }

    pub fn more_buy_to_open() -> Self {
        Condition::MoreBuyToOpen {
            matched: BTreeSet::new(),
        }
    }

    pub fn nega_end_up_n_percent(fraction: f64) -> Self {
        Condition::NegaEndUpNPercent {
            fraction,
            matched: BTreeSet::new(),
        }
    }

    pub fn posa_end_booming(fraction: f64) -> Self {
        Condition::PosaEndBooming {
            fraction,
            matched: BTreeSet::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        ctx: &EvalContext<'_>,
        asset: &str,
    ) -> Result<ConditionMatch, TickReplayError> {
        match self {
            Condition::LowForPeriod(window) => {
                let price = ctx.market.price(asset, ctx.date, ctx.tick)?;
                let sd = window.sd;
                let closes = window.warm(ctx.market, asset, ctx.date)?;
                let min = closes.iter().copied().fold(f64::INFINITY, f64::min);
                Ok(ConditionMatch::asset(price < min + sd * sample_std(closes)))
            }
            Condition::HighForPeriod(window) => {
                let price = ctx.market.price(asset, ctx.date, ctx.tick)?;
                let sd = window.sd;
                let closes = window.warm(ctx.market, asset, ctx.date)?;
                let max = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Ok(ConditionMatch::asset(price > max - sd * sample_std(closes)))
            }
            Condition::DownNPercent { fraction, matched } => {
                let threshold = 1.0 - *fraction;
                scan(ctx, asset, matched, |pos, price| {
                    pos.cost_ratio(price).is_some_and(|r| r < threshold)
                })
            }
            Condition::UpNPercent { fraction, matched } => {
                let threshold = 1.0 + *fraction;
                scan(ctx, asset, matched, |pos, price| {
                    pos.cost_ratio(price).is_some_and(|r| r >= threshold)
                })
            }
            Condition::SoldToOpen { matched } => {
                scan(ctx, asset, matched, |pos, _| pos.is_short())
            }
            Condition::MoreBuyToOpen { matched } => {
                let Some(holding) = ctx.portfolio.holding(asset) else {
                    return Ok(ConditionMatch::no_match());
                };
                let longs = holding.long_legs().count();
                let shorts = holding.short_legs().count();
                let found: BTreeSet<String> = if longs > shorts {
                    holding.long_legs().map(|p| p.id.clone()).collect()
                } else {
                    BTreeSet::new()
                };
                matched.extend(found.iter().cloned());
                Ok(ConditionMatch::narrowed(found))
            }
            Condition::NegaEndUpNPercent { fraction, matched } => {
                let threshold = 1.0 + *fraction;
                scan(ctx, asset, matched, |pos, price| {
                    pos.is_short() && pos.cost_ratio(price).is_some_and(|r| r >= threshold)
                })
            }
            Condition::PosaEndBooming { fraction, matched } => {
                let threshold = 1.0 + *fraction;
                scan(ctx, asset, matched, |pos, price| {
                    pos.is_long() && pos.cost_ratio(price).is_some_and(|r| r >= threshold)
                })
            }
            Condition::All(children) => {
                if children.is_empty() {
                    return Ok(ConditionMatch::no_match());
                }
                let mut matched = true;
                let mut positions: Option<BTreeSet<String>> = None;
                for child in children.iter_mut() {
                    let result = child.evaluate(ctx, asset)?;
                    matched &= result.matched;
                    if let Some(child_positions) = result.positions {
                        positions = Some(match positions {
                            None => child_positions,
                            Some(acc) => acc.intersection(&child_positions).cloned().collect(),
                        });
                    }
                }
                if positions.as_ref().is_some_and(|p| p.is_empty()) {
                    matched = false;
                }
                Ok(ConditionMatch { matched, positions })
            }
            Condition::Any(children) => {
                let mut matched = false;
                let mut whole_asset = false;
                let mut union = BTreeSet::new();
                for child in children.iter_mut() {
                    let result = child.evaluate(ctx, asset)?;
                    if !result.matched {
                        continue;
                    }
                    matched = true;
                    match result.positions {
                        Some(p) => union.extend(p),
                        None => whole_asset = true,
                    }
                }
                let positions = if !matched || whole_asset {
                    None
                } else {
                    Some(union)
                };
                Ok(ConditionMatch { matched, positions })
            }
        }
    }

    /// End-of-day window maintenance, recursing through combinators.
    pub fn advance_windows(
        &mut self,
        market: &MarketData,
        date: NaiveDate,
    ) -> Result<(), TickReplayError> {
        match self {
            Condition::LowForPeriod(window) | Condition::HighForPeriod(window) => {
                window.advance(market, date)
            }
            Condition::All(children) | Condition::Any(children) => children
                .iter_mut()
                .try_for_each(|child| child.advance_windows(market, date)),
            _ => Ok(()),
        }
    }

    /// Positions matched by holdings-scanning conditions since the last clear.
    pub fn matched_positions(&self) -> BTreeSet<String> {
        match self {
            Condition::DownNPercent { matched, .. }
            | Condition::UpNPercent { matched, .. }
            | Condition::SoldToOpen { matched }
            | Condition::MoreBuyToOpen { matched }
            | Condition::NegaEndUpNPercent { matched, .. }
            | Condition::PosaEndBooming { matched, .. } => matched.clone(),
            Condition::All(children) | Condition::Any(children) => children
                .iter()
                .flat_map(|child| child.matched_positions())
                .collect(),
            Condition::LowForPeriod(_) | Condition::HighForPeriod(_) => BTreeSet::new(),
        }
    }

    pub fn clear_matches(&mut self) {
        match self {
            Condition::DownNPercent { matched, .. }
            | Condition::UpNPercent { matched, .. }
            | Condition::SoldToOpen { matched }
            | Condition::MoreBuyToOpen { matched }
            | Condition::NegaEndUpNPercent { matched, .. }
            | Condition::PosaEndBooming { matched, .. } => matched.clear(),
            Condition::All(children) | Condition::Any(children) => {
                children.iter_mut().for_each(Condition::clear_matches)
            }
            Condition::LowForPeriod(_) | Condition::HighForPeriod(_) => {}
        }
    }
}

/// Collect positions under `asset` that satisfy `predicate` at today's price.
fn scan(
    ctx: &EvalContext<'_>,
    asset: &str,
    matched: &mut BTreeSet<String>,
    predicate: impl Fn(&Position, f64) -> bool,
) -> Result<ConditionMatch, TickReplayError> {
    let Some(holding) = ctx.portfolio.holding(asset) else {
        return Ok(ConditionMatch::no_match());
    };
    for position in holding.positions.values() {
        let price = ctx.market.price(&position.id, ctx.date, ctx.tick)?;
        if predicate(position, price) {
            matched.insert(position.id.clone());
        }
    }
    let found: BTreeSet<String> = holding
        .positions
        .keys()
        .filter(|id| matched.contains(*id))
        .cloned()
        .collect();
    Ok(ConditionMatch::narrowed(found))
}
