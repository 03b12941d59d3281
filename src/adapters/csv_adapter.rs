//! CSV file data adapter.
//!
//! Files live at `{base}/daily/{SYMBOL}.csv` or `{base}/hourly/{SYMBOL}.csv`
//! with a `Date,Open,High,Low,Close,Volume` header. Extra columns such as
//! `Adj Close` are ignored.

use crate::domain::clock::Resolution;
use crate::domain::error::TickReplayError;
use crate::domain::ohlcv::{OhlcvBar, PriceSeries};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "Datetime", alias = "datetime")]
    date: String,
    #[serde(alias = "Open")]
    open: f64,
    #[serde(alias = "High")]
    high: f64,
    #[serde(alias = "Low")]
    low: f64,
    #[serde(alias = "Close")]
    close: f64,
    #[serde(alias = "Volume", default)]
    volume: f64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
    resolution: Resolution,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf, resolution: Resolution) -> Self {
        Self {
            base_path,
            resolution,
        }
    }

    fn dir(&self) -> PathBuf {
        self.base_path.join(self.resolution.to_string())
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.dir().join(format!("{}.csv", symbol))
    }
}

fn invalid_row(symbol: &str, line: usize, reason: String) -> TickReplayError {
    TickReplayError::DataUnavailable {
        symbol: symbol.to_string(),
        reason: format!("line {}: {}", line, reason),
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, ignoring any trailing UTC offset.
fn parse_hour(value: &str) -> Option<(NaiveDate, u32)> {
    let stamp = NaiveDateTime::parse_from_str(value.get(..19)?, "%Y-%m-%d %H:%M:%S").ok()?;
    Some((stamp.date(), stamp.hour()))
}

impl DataPort for CsvAdapter {
    fn load_series(&self, symbol: &str) -> Result<PriceSeries, TickReplayError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| TickReplayError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut daily = Vec::new();
        let mut hourly = Vec::new();

        for (index, result) in rdr.deserialize::<CsvRow>().enumerate() {
            let line = index + 2;
            let row = result?;
            let bar = |date| OhlcvBar {
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            };

            match self.resolution {
                Resolution::Daily => {
                    let date = parse_day(row.date.trim()).ok_or_else(|| {
                        invalid_row(symbol, line, format!("invalid date '{}'", row.date))
                    })?;
                    daily.push(bar(date));
                }
                Resolution::Hourly => {
                    let (date, hour) = parse_hour(row.date.trim()).ok_or_else(|| {
                        invalid_row(symbol, line, format!("invalid timestamp '{}'", row.date))
                    })?;
                    hourly.push((hour, bar(date)));
                }
            }
        }

        let series = match self.resolution {
            Resolution::Daily => PriceSeries::from_daily(symbol, daily),
            Resolution::Hourly => PriceSeries::from_hourly(symbol, hourly),
        };
        if series.is_empty() {
            return Err(TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("{} has no rows", path.display()),
            });
        }
        Ok(series)
    }

    fn list_symbols(&self) -> Result<Vec<String>, TickReplayError> {
        let dir = self.dir();
        let mut symbols = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "csv") {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                symbols.push(stem.to_string_lossy().into_owned());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
