//! Market data owned by a backtest run.
//!
//! Underlying series are loaded up front and shared by `Arc`. Option series
//! are fetched on first use through an [`OptionSeriesCache`], which remembers
//! failures so a bad symbol costs at most one fetch per run.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::Tick;
use super::error::TickReplayError;
use super::ohlcv::PriceSeries;
use super::price;
use crate::ports::data_port::OptionDataPort;

#[derive(Debug, Clone)]
enum CacheEntry {
    Available(Arc<PriceSeries>),
    Unavailable(String),
}

/// Read-through cache of option series with negative caching.
///
/// Entries are never evicted during a run; [`OptionSeriesCache::clear`]
/// resets the cache between runs.
pub struct OptionSeriesCache {
    source: Option<Box<dyn OptionDataPort>>,
    entries: HashMap<String, CacheEntry>,
    fetches: usize,
}

impl OptionSeriesCache {
    pub fn new(source: Box<dyn OptionDataPort>) -> Self {
        OptionSeriesCache {
            source: Some(source),
            entries: HashMap::new(),
            fetches: 0,
        }
    }

    /// A cache with no backing source. Every fetch fails.
    pub fn disabled() -> Self {
        OptionSeriesCache {
            source: None,
            entries: HashMap::new(),
            fetches: 0,
        }
    }

    /// A cached series, without fetching.
    pub fn get(&self, symbol: &str) -> Option<&Arc<PriceSeries>> {
        match self.entries.get(symbol) {
            Some(CacheEntry::Available(series)) => Some(series),
            _ => None,
        }
    }

    pub fn is_unavailable(&self, symbol: &str) -> bool {
        matches!(self.entries.get(symbol), Some(CacheEntry::Unavailable(_)))
    }

    pub fn fetch(
        &mut self,
        symbol: &str,
        start: NaiveDate,
    ) -> Result<Arc<PriceSeries>, TickReplayError> {
        match self.entries.get(symbol) {
            Some(CacheEntry::Available(series)) => return Ok(Arc::clone(series)),
            Some(CacheEntry::Unavailable(reason)) => {
                return Err(TickReplayError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: reason.clone(),
                });
            }
            None => {}
        }

        let Some(source) = self.source.as_ref() else {
            let reason = "no option data source configured".to_string();
            self.entries
                .insert(symbol.to_string(), CacheEntry::Unavailable(reason.clone()));
            return Err(TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason,
            });
        };

        self.fetches += 1;
        let outcome = match source.fetch_option_series(symbol, start) {
            Ok(series) if series.is_empty() => Err("no rows returned".to_string()),
            Ok(series) => Ok(Arc::new(series)),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(series) => {
                info!(symbol, rows = series.len(), "fetched option series");
                self.entries.insert(
                    symbol.to_string(),
                    CacheEntry::Available(Arc::clone(&series)),
                );
                Ok(series)
            }
            Err(reason) => {
                warn!(symbol, %reason, "option series unavailable; caching failure");
                self.entries
                    .insert(symbol.to_string(), CacheEntry::Unavailable(reason.clone()));
                Err(TickReplayError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason,
                })
            }
        }
    }

    /// Number of calls made to the backing source.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.fetches = 0;
    }
}

/// Underlying series plus the option cache.
pub struct MarketData {
    equities: BTreeMap<String, Arc<PriceSeries>>,
    options: OptionSeriesCache,
}

impl MarketData {
    pub fn new(series: Vec<PriceSeries>) -> Self {
        MarketData {
            equities: series
                .into_iter()
                .map(|s| (s.symbol().to_string(), Arc::new(s)))
                .collect(),
            options: OptionSeriesCache::disabled(),
        }
    }

    pub fn with_option_source(mut self, source: Box<dyn OptionDataPort>) -> Self {
        self.options = OptionSeriesCache::new(source);
        self
    }

    pub fn insert(&mut self, series: PriceSeries) {
        self.equities
            .insert(series.symbol().to_string(), Arc::new(series));
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.equities.keys().map(String::as_str)
    }

    /// Series for an underlying or an already-fetched option symbol.
    pub fn series(&self, symbol: &str) -> Option<&Arc<PriceSeries>> {
        self.equities
            .get(symbol)
            .or_else(|| self.options.get(symbol))
    }

    pub fn price(&self, symbol: &str, date: NaiveDate, tick: Tick) -> Result<f64, TickReplayError> {
        let series = self
            .series(symbol)
            .ok_or_else(|| TickReplayError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no series loaded".into(),
            })?;
        Ok(price::resolve(series, date, tick)?)
    }

    pub fn option_series(
        &mut self,
        symbol: &str,
        start: NaiveDate,
    ) -> Result<Arc<PriceSeries>, TickReplayError> {
        self.options.fetch(symbol, start)
    }

    pub fn options(&self) -> &OptionSeriesCache {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionSeriesCache {
        &mut self.options
    }

    /// Weekdays on which at least one of `universe` printed a bar.
    pub fn is_trading_day<S: AsRef<str>>(&self, universe: &[S], date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let open = universe.iter().any(|symbol| {
            self.equities
                .get(symbol.as_ref())
                .is_some_and(|series| series.bar(date).is_some())
        });
        if !open {
            debug!(%date, "no universe bar; treating as market holiday");
        }
        open
    }
}
