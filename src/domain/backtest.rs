//! Backtest state and driver loop.
//!
//! [`BacktestingState`] owns everything a run mutates. Each call to
//! [`BacktestingState::step`] processes one tick in a fixed order:
//!
//! 1. Daily runs skip ticks on days the market is closed.
//! 2. Record the portfolio (and benchmark) value.
//! 3. Evaluate buying conditions and buy, respecting the buy cooldown.
//! 4. Evaluate selling conditions and sell, respecting the profit gate and
//!    the sell cooldown.
//! 5. At end of day, advance rolling windows and liquidate expired options.
//!
//! Then the clock advances.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, Resolution, Tick};
use super::condition::EvalContext;
use super::error::TickReplayError;
use super::execution::{self, Fill, OrderResult};
use super::market::MarketData;
use super::portfolio::Portfolio;
use super::strategy::{ProfitGate, Strategy, cooldown_elapsed};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub resolution: Resolution,
    pub initial_capital: f64,
    pub fee: f64,
}

impl BacktestConfig {
    pub fn total_ticks(&self) -> Result<usize, TickReplayError> {
        if self.start_date > self.end_date {
            return Err(TickReplayError::ConfigInvalid {
                section: "backtest".into(),
                key: "end_date".into(),
                reason: format!(
                    "end_date {} is before start_date {}",
                    self.end_date, self.start_date
                ),
            });
        }
        let days = (self.end_date - self.start_date).num_days() as usize;
        Ok((days + 1) * self.resolution.ticks_per_day())
    }

    /// Date of the `index`th tick of the run.
    pub fn date_for_tick(&self, index: usize) -> NaiveDate {
        let day = index / self.resolution.ticks_per_day();
        self.start_date + Duration::days(day as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Buy,
    Sell,
    Expire,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
            Side::Expire => write!(f, "Expire"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub tick: String,
    pub value: f64,
    pub benchmark: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub date: NaiveDate,
    pub tick: String,
    pub asset: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

/// Buy-and-hold comparison: fixed units bought at the start.
#[derive(Debug, Clone, PartialEq)]
pub struct Benchmark {
    units: BTreeMap<String, f64>,
}

impl Benchmark {
    /// Split `initial_value` across `weights` at the prices on `start`.
    pub fn new(
        weights: &[(String, f64)],
        market: &MarketData,
        initial_value: f64,
        start: NaiveDate,
        tick: Tick,
    ) -> Result<Self, TickReplayError> {
        let mut units = BTreeMap::new();
        for (symbol, weight) in weights {
            let price = market.price(symbol, start, tick)?;
            units.insert(symbol.clone(), weight * initial_value / price);
        }
        Ok(Benchmark { units })
    }

    pub fn value(
        &self,
        market: &MarketData,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<f64, TickReplayError> {
        let mut value = 0.0;
        for (symbol, units) in &self.units {
            value += units * market.price(symbol, date, tick)?;
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub history: Vec<ValuePoint>,
    pub events: Vec<TradeEvent>,
    pub snapshot: String,
    pub initial_value: f64,
    pub final_value: f64,
}

pub struct BacktestingState {
    pub strategy: Strategy,
    pub portfolio: Portfolio,
    pub market: MarketData,
    clock: Clock,
    last_purchase: Option<NaiveDate>,
    last_sale: Option<NaiveDate>,
    buy_candidates: BTreeSet<String>,
    sell_candidates: BTreeSet<String>,
    history: Vec<ValuePoint>,
    events: Vec<TradeEvent>,
    benchmark_weights: Vec<(String, f64)>,
    benchmark: Option<Benchmark>,
}

impl BacktestingState {
    pub fn new(config: &BacktestConfig, strategy: Strategy, market: MarketData) -> Self {
        BacktestingState {
            strategy,
            portfolio: Portfolio::new(config.initial_capital, config.fee),
            market,
            clock: Clock::new(config.resolution),
            last_purchase: None,
            last_sale: None,
            buy_candidates: BTreeSet::new(),
            sell_candidates: BTreeSet::new(),
            history: Vec::new(),
            events: Vec::new(),
            benchmark_weights: Vec::new(),
            benchmark: None,
        }
    }

    /// Compare against holding `weights` of the starting value.
    pub fn with_benchmark(mut self, weights: Vec<(String, f64)>) -> Self {
        self.benchmark_weights = weights;
        self
    }

    pub fn history(&self) -> &[ValuePoint] {
        &self.history
    }

    pub fn events(&self) -> &[TradeEvent] {
        &self.events
    }

    pub fn last_purchase(&self) -> Option<NaiveDate> {
        self.last_purchase
    }

    pub fn last_sale(&self) -> Option<NaiveDate> {
        self.last_sale
    }

    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    fn start_benchmark(&mut self, start: NaiveDate) -> Result<(), TickReplayError> {
        if self.benchmark_weights.is_empty() || self.benchmark.is_some() {
            return Ok(());
        }
        let benchmark = Benchmark::new(
            &self.benchmark_weights,
            &self.market,
            self.portfolio.initial_value(),
            start,
            Tick::open(self.clock.resolution()),
        )?;
        self.benchmark = Some(benchmark);
        Ok(())
    }

    /// Process the current tick on `date`, then advance the clock.
    pub fn step(&mut self, date: NaiveDate) -> Result<(), TickReplayError> {
        let tick = self.clock.tick();

        if self.clock.resolution() == Resolution::Daily
            && !self.market.is_trading_day(&self.strategy.universe, date)
        {
            self.clock.forward_time();
            return Ok(());
        }

        self.record_value(date, tick)?;
        self.run_buys(date, tick)?;
        self.run_sells(date, tick)?;

        if self.clock.is_eod() {
            self.strategy.advance_windows(&self.market, date)?;
            self.run_expirations(date, tick)?;
        }

        self.clock.forward_time();
        Ok(())
    }

    fn record_value(&mut self, date: NaiveDate, tick: Tick) -> Result<(), TickReplayError> {
        let value = self.portfolio.get_portfolio_value(&self.market, date, tick)?;
        let benchmark = match &self.benchmark {
            Some(b) => Some(b.value(&self.market, date, tick)?),
            None => None,
        };
        self.history.push(ValuePoint {
            date,
            tick: tick.label().to_string(),
            value,
            benchmark,
        });
        Ok(())
    }

    fn run_buys(&mut self, date: NaiveDate, tick: Tick) -> Result<(), TickReplayError> {
        let ctx = EvalContext {
            market: &self.market,
            portfolio: &self.portfolio,
            date,
            tick,
        };
        let (matched, affected) = self.strategy.buying_conditions_are_met(&ctx)?;

        if matched {
            if cooldown_elapsed(self.last_purchase, self.strategy.buying_delay, date) {
                self.buy_candidates = affected;
                let mut bought = false;
                for asset in std::mem::take(&mut self.buy_candidates) {
                    let outcome = execution::buy(
                        &mut self.portfolio,
                        &mut self.market,
                        &self.strategy,
                        &asset,
                        date,
                        tick,
                    );
                    if let Some(fills) = filled(outcome, &asset)? {
                        bought = true;
                        self.record_fills(date, tick, Side::Buy, fills);
                    }
                }
                if bought {
                    self.last_purchase = Some(date);
                }
            } else {
                debug!(%date, tick = tick.label(), "buy signal during cooldown; discarded");
            }
        }

        self.strategy.clear_matches();
        Ok(())
    }

    fn run_sells(&mut self, date: NaiveDate, tick: Tick) -> Result<(), TickReplayError> {
        let is_profitable = match self.strategy.profit_gate {
            ProfitGate::Portfolio => self.portfolio.is_profitable(&self.market, date, tick)?,
            ProfitGate::Off | ProfitGate::Position => true,
        };
        let ctx = EvalContext {
            market: &self.market,
            portfolio: &self.portfolio,
            date,
            tick,
        };
        let (matched, affected) = self
            .strategy
            .selling_conditions_are_met(&ctx, is_profitable)?;

        if matched {
            if cooldown_elapsed(self.last_sale, self.strategy.selling_delay, date) {
                self.sell_candidates = affected;
                let mut sold = false;
                for target in std::mem::take(&mut self.sell_candidates) {
                    for id in self.portfolio.positions_for(&target)? {
                        if !self.passes_position_gate(&id, date, tick)? {
                            continue;
                        }
                        let outcome = execution::sell(
                            &mut self.portfolio,
                            &self.market,
                            &self.strategy,
                            &id,
                            date,
                            tick,
                        );
                        if let Some(fills) = filled(outcome, &id)? {
                            sold = true;
                            self.record_fills(date, tick, Side::Sell, fills);
                        }
                    }
                }
                if sold {
                    self.last_sale = Some(date);
                }
            } else {
                debug!(%date, tick = tick.label(), "sell signal during cooldown; discarded");
            }
        }

        self.strategy.clear_matches();
        Ok(())
    }

    fn passes_position_gate(
        &self,
        id: &str,
        date: NaiveDate,
        tick: Tick,
    ) -> Result<bool, TickReplayError> {
        if self.strategy.profit_gate != ProfitGate::Position {
            return Ok(true);
        }
        let Some(position) = self.portfolio.find_position(id) else {
            return Ok(false);
        };
        match self.market.price(id, date, tick) {
            Ok(price) => Ok(position.is_in_profit(price)),
            Err(e) if !e.is_fatal() => {
                warn!(asset = id, error = %e, "cannot price position for profit gate");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn run_expirations(&mut self, date: NaiveDate, tick: Tick) -> Result<(), TickReplayError> {
        let fills = execution::expire_options(&mut self.portfolio, &self.market, date)?;
        self.record_fills(date, tick, Side::Expire, fills);
        Ok(())
    }

    fn record_fills(&mut self, date: NaiveDate, tick: Tick, side: Side, fills: Vec<Fill>) {
        for fill in fills {
            self.events.push(TradeEvent {
                date,
                tick: tick.label().to_string(),
                asset: fill.asset,
                side,
                price: fill.price,
                quantity: fill.quantity,
            });
        }
    }

    /// Human-readable summary of the run so far.
    pub fn snapshot(&self) -> String {
        let initial = self
            .history
            .first()
            .map_or(self.portfolio.initial_value(), |p| p.value);
        let current = self.history.last().map_or(initial, |p| p.value);

        let mut out = format!(
            "Snapshot:\nInitial Value: {:.2}\nCurrent Value: {:.2}\nBuying Power: {:.2}\n\
             Current Holdings: {}\nPercent Change from Start: {:.2}%",
            initial,
            current,
            self.portfolio.buying_power(),
            self.portfolio,
            percent_change(initial, current)
        );

        let first = self.history.first().and_then(|p| p.benchmark);
        let last = self.history.last().and_then(|p| p.benchmark);
        if let (Some(first), Some(last)) = (first, last) {
            out.push_str(&format!(
                "\nPercent Change for HODL: {:.2}%",
                percent_change(first, last)
            ));
        }
        out
    }
}

fn percent_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        100.0 * (to / from - 1.0)
    }
}

/// Unwrap an order outcome, logging rejections and non-fatal errors.
fn filled(
    outcome: Result<OrderResult, TickReplayError>,
    asset: &str,
) -> Result<Option<Vec<Fill>>, TickReplayError> {
    match outcome {
        Ok(OrderResult::Filled(fills)) => Ok(Some(fills)),
        Ok(OrderResult::Rejected(_)) => Ok(None),
        Err(e) if !e.is_fatal() => {
            warn!(asset, error = %e, "order skipped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run every tick between the configured dates.
pub fn run_backtest(
    state: &mut BacktestingState,
    config: &BacktestConfig,
) -> Result<BacktestResult, TickReplayError> {
    let total_ticks = config.total_ticks()?;
    info!(
        strategy = %state.strategy.name,
        start = %config.start_date,
        end = %config.end_date,
        resolution = %config.resolution,
        total_ticks,
        "starting backtest"
    );

    state.start_benchmark(config.start_date)?;

    for index in 0..total_ticks {
        let date = config.date_for_tick(index);
        if let Err(e) = state.step(date) {
            error!(%date, error = %e, "backtest aborted");
            return Err(e);
        }
    }

    let snapshot = state.snapshot();
    let initial_value = state
        .history
        .first()
        .map_or(state.portfolio.initial_value(), |p| p.value);
    let final_value = state.history.last().map_or(initial_value, |p| p.value);
    info!(
        final_value,
        trades = state.events.len(),
        "backtest complete"
    );

    Ok(BacktestResult {
        history: state.history.clone(),
        events: state.events.clone(),
        snapshot,
        initial_value,
        final_value,
    })
}
