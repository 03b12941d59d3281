//! OHLCV bars and the immutable per-asset price series.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::ops::Bound;

use super::clock::{Resolution, Tick};

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Price history for one instrument.
///
/// Daily bars are always present. Series built from hourly data additionally
/// keep the hourly bars keyed by (date, hour); their daily bars are the
/// aggregate of each day's hours.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    symbol: String,
    daily: BTreeMap<NaiveDate, OhlcvBar>,
    hourly: BTreeMap<(NaiveDate, u32), OhlcvBar>,
}

impl PriceSeries {
    pub fn from_daily(symbol: impl Into<String>, bars: Vec<OhlcvBar>) -> Self {
        PriceSeries {
            symbol: symbol.into(),
            daily: bars.into_iter().map(|b| (b.date, b)).collect(),
            hourly: BTreeMap::new(),
        }
    }

    /// Build from `(hour, bar)` pairs; hours are 0..=23.
    pub fn from_hourly(symbol: impl Into<String>, bars: Vec<(u32, OhlcvBar)>) -> Self {
        let hourly: BTreeMap<(NaiveDate, u32), OhlcvBar> =
            bars.into_iter().map(|(h, b)| ((b.date, h), b)).collect();

        let mut daily: BTreeMap<NaiveDate, OhlcvBar> = BTreeMap::new();
        for bar in hourly.values() {
            daily
                .entry(bar.date)
                .and_modify(|day| {
                    day.high = day.high.max(bar.high);
                    day.low = day.low.min(bar.low);
                    day.close = bar.close;
                    day.volume += bar.volume;
                })
                .or_insert_with(|| bar.clone());
        }

        PriceSeries {
            symbol: symbol.into(),
            daily,
            hourly,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.daily.len()
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_empty()
    }

    pub fn has_intraday(&self) -> bool {
        !self.hourly.is_empty()
    }

    pub fn bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.daily.get(&date)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.daily.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.daily.keys().next_back().copied()
    }

    /// Exact lookup of the price at a tick. Daily ticks read the bar's open or
    /// close; hourly ticks read the open of that hour's bar.
    pub fn price_at(&self, date: NaiveDate, tick: Tick) -> Option<f64> {
        match tick.resolution {
            Resolution::Daily => self.daily.get(&date).map(|bar| {
                if tick.index == 0 {
                    bar.open
                } else {
                    bar.close
                }
            }),
            Resolution::Hourly => self
                .hourly
                .get(&(date, tick.index as u32))
                .map(|bar| bar.open),
        }
    }

    /// Daily bars strictly before `date`, most recent first.
    pub fn bars_before(&self, date: NaiveDate) -> impl Iterator<Item = &OhlcvBar> {
        self.daily.range(..date).rev().map(|(_, bar)| bar)
    }

    /// The closest daily bar strictly before `date`.
    pub fn previous_bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.bars_before(date).next()
    }

    /// The closest daily bar strictly after `date`.
    pub fn next_bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.daily
            .range((Bound::Excluded(date), Bound::Unbounded))
            .next()
            .map(|(_, bar)| bar)
    }
}
