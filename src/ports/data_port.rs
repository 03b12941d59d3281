//! Price data ports.

use crate::domain::error::TickReplayError;
use crate::domain::ohlcv::PriceSeries;
use chrono::NaiveDate;

/// Source of underlying price history, loaded once per asset before a run.
pub trait DataPort {
    fn load_series(&self, symbol: &str) -> Result<PriceSeries, TickReplayError>;

    fn list_symbols(&self) -> Result<Vec<String>, TickReplayError>;
}

/// Source of option contract history, fetched lazily during a run.
///
/// Implementations may block on network I/O. Callers go through
/// `OptionSeriesCache`, which memoizes both successes and failures.
pub trait OptionDataPort {
    fn fetch_option_series(
        &self,
        symbol: &str,
        start: NaiveDate,
    ) -> Result<PriceSeries, TickReplayError>;
}
