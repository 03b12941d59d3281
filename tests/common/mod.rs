#![allow(dead_code)]

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashMap;
use tickreplay::adapters::file_config_adapter::FileConfigAdapter;
use tickreplay::domain::error::TickReplayError;
pub use tickreplay::domain::ohlcv::{OhlcvBar, PriceSeries};
use tickreplay::ports::data_port::{DataPort, OptionDataPort};

pub struct MockDataPort {
    pub data: HashMap<String, PriceSeries>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.data.insert(series.symbol().to_string(), series);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn load_series(&self, symbol: &str) -> Result<PriceSeries, TickReplayError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no mock data".into(),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, TickReplayError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Answers every contract symbol with the same bars.
pub struct MockOptionPort {
    pub bars: Vec<OhlcvBar>,
}

impl OptionDataPort for MockOptionPort {
    fn fetch_option_series(
        &self,
        symbol: &str,
        _start: NaiveDate,
    ) -> Result<PriceSeries, TickReplayError> {
        if self.bars.is_empty() {
            return Err(TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no history".into(),
            });
        }
        Ok(PriceSeries::from_daily(symbol, self.bars.clone()))
    }
}

/// Answers each contract symbol with its own bars.
pub struct MockOptionChain {
    pub bars: HashMap<String, Vec<OhlcvBar>>,
}

impl OptionDataPort for MockOptionChain {
    fn fetch_option_series(
        &self,
        symbol: &str,
        _start: NaiveDate,
    ) -> Result<PriceSeries, TickReplayError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "unknown contract".into(),
            })?;
        Ok(PriceSeries::from_daily(symbol, bars.clone()))
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn make_bar(date: NaiveDate, open: f64, close: f64) -> OhlcvBar {
    OhlcvBar {
        date,
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 1000.0,
    }
}

pub fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Weekdays from `start` through `end`, inclusive.
pub fn weekdays(start: &str, end: &str) -> Vec<NaiveDate> {
    let (start, end) = (date(start), date(end));
    let mut days = Vec::new();
    let mut d = start;
    while d <= end {
        if is_weekday(d) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

/// One bar per weekday with open == close == `price`.
pub fn flat_series(symbol: &str, start: &str, end: &str, price: f64) -> PriceSeries {
    let bars = weekdays(start, end)
        .into_iter()
        .map(|d| make_bar(d, price, price))
        .collect();
    PriceSeries::from_daily(symbol, bars)
}

/// Bars from explicit `(date, open, close)` rows.
pub fn series(symbol: &str, rows: &[(&str, f64, f64)]) -> PriceSeries {
    let bars = rows
        .iter()
        .map(|&(d, open, close)| make_bar(date(d), open, close))
        .collect();
    PriceSeries::from_daily(symbol, bars)
}

pub fn ini(content: &str) -> FileConfigAdapter {
    FileConfigAdapter::from_string(content).unwrap()
}

/// Backtest section with 10,000 capital and a fee of 5.
pub fn backtest_section(start: &str, end: &str) -> String {
    format!(
        "[backtest]\nstart_date = {start}\nend_date = {end}\nresolution = daily\n\
         initial_capital = 10000\nfee = 5\n"
    )
}
