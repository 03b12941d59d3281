//! Tradier market history adapter for option contracts.
//!
//! The HTTP client is behind the `tradier` feature. Response parsing is always
//! compiled so it can be tested offline.

use crate::domain::error::TickReplayError;
use crate::domain::ohlcv::{OhlcvBar, PriceSeries};
use chrono::NaiveDate;
use serde::Deserialize;

pub const SANDBOX_URL: &str = "https://sandbox.tradier.com/v1/markets/history";
pub const API_KEY_VAR: &str = "TRADIER_API_KEY";

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: History,
}

/// Tradier sends `"history": "null"` (or a JSON null) when there is no data.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum History {
    Days { day: Days },
    Empty(Option<String>),
}

/// A single day arrives as an object rather than a one-element array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Days {
    Many(Vec<Day>),
    One(Day),
}

#[derive(Debug, Deserialize)]
struct Day {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

fn unavailable(symbol: &str, reason: impl Into<String>) -> TickReplayError {
    TickReplayError::DataUnavailable {
        symbol: symbol.to_string(),
        reason: reason.into(),
    }
}

/// Parse a `/markets/history` body into a daily series.
pub fn parse_history(symbol: &str, body: &str) -> Result<PriceSeries, TickReplayError> {
    let response: HistoryResponse = serde_json::from_str(body)
        .map_err(|e| unavailable(symbol, format!("unexpected response: {}", e)))?;

    let days = match response.history {
        History::Days { day: Days::Many(days) } => days,
        History::Days { day: Days::One(day) } => vec![day],
        History::Empty(_) => return Err(unavailable(symbol, "no history")),
    };

    let mut bars = Vec::with_capacity(days.len());
    for day in days {
        let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
            .map_err(|_| unavailable(symbol, format!("invalid date '{}'", day.date)))?;
        bars.push(OhlcvBar {
            date,
            open: day.open,
            high: day.high,
            low: day.low,
            close: day.close,
            volume: day.volume,
        });
    }

    if bars.is_empty() {
        return Err(unavailable(symbol, "no history"));
    }
    Ok(PriceSeries::from_daily(symbol, bars))
}

#[cfg(feature = "tradier")]
pub use client::TradierAdapter;

#[cfg(feature = "tradier")]
mod client {
    use super::{API_KEY_VAR, SANDBOX_URL, parse_history, unavailable};
    use crate::domain::error::TickReplayError;
    use crate::domain::ohlcv::PriceSeries;
    use crate::ports::data_port::OptionDataPort;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tracing::{debug, info};

    pub struct TradierAdapter {
        client: reqwest::blocking::Client,
        api_key: String,
        base_url: String,
    }

    impl TradierAdapter {
        pub fn new(api_key: String, base_url: String) -> Result<Self, TickReplayError> {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| TickReplayError::ConfigInvalid {
                    section: "tradier".to_string(),
                    key: "client".to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Self {
                client,
                api_key,
                base_url,
            })
        }

        /// Sandbox client authenticated from `TRADIER_API_KEY`.
        pub fn from_env() -> Result<Self, TickReplayError> {
            let api_key = std::env::var(API_KEY_VAR)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| TickReplayError::ConfigMissing {
                    section: "environment".to_string(),
                    key: API_KEY_VAR.to_string(),
                })?;
            Self::new(api_key, SANDBOX_URL.to_string())
        }
    }

    impl OptionDataPort for TradierAdapter {
        fn fetch_option_series(
            &self,
            symbol: &str,
            start: NaiveDate,
        ) -> Result<PriceSeries, TickReplayError> {
            debug!(symbol, %start, "requesting option history");
            let start = start.to_string();
            let response = self
                .client
                .get(&self.base_url)
                .query(&[("symbol", symbol), ("start", start.as_str())])
                .bearer_auth(&self.api_key)
                .header("Accept", "application/json")
                .send()
                .map_err(|e| unavailable(symbol, format!("request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(unavailable(symbol, format!("HTTP {}", status)));
            }
            let body = response
                .text()
                .map_err(|e| unavailable(symbol, format!("failed to read body: {}", e)))?;

            let series = parse_history(symbol, &body)?;
            info!(symbol, rows = series.len(), "fetched option history");
            Ok(series)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_array() {
        let body = r#"{"history":{"day":[
            {"date":"2020-03-02","open":1.5,"high":1.9,"low":1.4,"close":1.8,"volume":120},
            {"date":"2020-03-03","open":1.8,"high":2.4,"low":1.7,"close":2.2,"volume":80}
        ]}}"#;
        let series = parse_history("CHGG200320C00040000", body).unwrap();
        assert_eq!(series.symbol(), "CHGG200320C00040000");
        assert_eq!(series.len(), 2);
        let bar = series
            .bar(NaiveDate::from_ymd_opt(2020, 3, 3).unwrap())
            .unwrap();
        assert_eq!(bar.close, 2.2);
        assert_eq!(bar.volume, 80.0);
    }

    #[test]
    fn parses_single_day_object() {
        let body = r#"{"history":{"day":{"date":"2020-03-20","open":0.01,"high":0.01,"low":0.01,"close":0.01,"volume":0}}}"#;
        let series = parse_history("CHGG200320C00040000", body).unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn null_history_is_unavailable() {
        for body in [r#"{"history":"null"}"#, r#"{"history":null}"#] {
            let err = parse_history("NOPE", body).unwrap_err();
            assert!(matches!(err, TickReplayError::DataUnavailable { ref reason, .. } if reason == "no history"));
        }
    }

    #[test]
    fn empty_day_array_is_unavailable() {
        let err = parse_history("NOPE", r#"{"history":{"day":[]}}"#).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn malformed_body_is_unavailable() {
        let err = parse_history("NOPE", "<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, TickReplayError::DataUnavailable { .. }));
    }

    #[test]
    fn bad_date_is_unavailable() {
        let body = r#"{"history":{"day":[{"date":"03/02/2020","open":1,"high":1,"low":1,"close":1,"volume":1}]}}"#;
        let err = parse_history("NOPE", body).unwrap_err();
        assert!(err.to_string().contains("03/02/2020"));
    }
}
