//! Price resolution with holiday lookback, post-expiration flattening and
//! interpolation.
//!
//! Resolution order for `(date, tick)`:
//! 1. Exact lookup
//! 2. Series ended before `date`: last available value, rounded to cents
//! 3. Step back one day at a time, at most [`LOOKBACK_DAYS`]
//! 4. Linear interpolation between the calendar-adjacent rows, rounded to cents
//!
//! Resolution never mutates the series.

use chrono::{Duration, NaiveDate};
use tracing::warn;

use super::clock::Tick;
use super::error::PriceError;
use super::ohlcv::{OhlcvBar, PriceSeries};

pub const LOOKBACK_DAYS: i64 = 5;

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn resolve(series: &PriceSeries, date: NaiveDate, tick: Tick) -> Result<f64, PriceError> {
    if let Some(price) = series.price_at(date, tick) {
        return checked(series, date, price);
    }

    let last_date = series.last_date().ok_or_else(|| unresolved(series, date, tick))?;
    if last_date < date {
        let last_bar = series
            .bar(last_date)
            .ok_or_else(|| unresolved(series, date, tick))?;
        let price = tick_value(series, last_bar, tick);
        return checked(series, last_date, price).map(round_cents);
    }

    for back in 1..=LOOKBACK_DAYS {
        let earlier = date - Duration::days(back);
        if let Some(price) = series.price_at(earlier, tick) {
            return checked(series, earlier, price);
        }
    }

    interpolate(series, date, tick)
}

fn interpolate(series: &PriceSeries, date: NaiveDate, tick: Tick) -> Result<f64, PriceError> {
    let prev = series.previous_bar(date);
    let next = series.next_bar(date);

    let estimate = match (prev, next) {
        (Some(prev), Some(next)) => {
            let prev_value = checked(series, prev.date, tick_value(series, prev, tick))?;
            let next_value = checked(series, next.date, tick_value(series, next, tick))?;
            let span = (next.date - prev.date).num_days() as f64;
            let offset = (date - prev.date).num_days() as f64;
            prev_value + (next_value - prev_value) * (offset / span)
        }
        (None, Some(next)) => checked(series, next.date, tick_value(series, next, tick))?,
        _ => return Err(unresolved(series, date, tick)),
    };

    let estimate = round_cents(estimate);
    warn!(
        symbol = series.symbol(),
        %date,
        tick = tick.label(),
        estimate,
        "price not found within lookback; using estimated price"
    );
    Ok(estimate)
}

fn tick_value(series: &PriceSeries, bar: &OhlcvBar, tick: Tick) -> f64 {
    series.price_at(bar.date, tick).unwrap_or(bar.close)
}

fn checked(series: &PriceSeries, date: NaiveDate, price: f64) -> Result<f64, PriceError> {
    if price.is_finite() {
        Ok(price)
    } else {
        Err(PriceError::Malformed {
            symbol: series.symbol().to_string(),
            date,
            value: price,
        })
    }
}

fn unresolved(series: &PriceSeries, date: NaiveDate, tick: Tick) -> PriceError {
    PriceError::Unresolved {
        symbol: series.symbol().to_string(),
        date,
        tick: tick.label().to_string(),
    }
}
