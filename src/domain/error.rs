//! Domain error types.

use chrono::NaiveDate;

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Failure modes of a single price lookup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceError {
    #[error("no price for {symbol} on {date} at {tick}")]
    Unresolved {
        symbol: String,
        date: NaiveDate,
        tick: String,
    },

    #[error("malformed price for {symbol} on {date}: {value}")]
    Malformed {
        symbol: String,
        date: NaiveDate,
        value: f64,
    },
}

/// Top-level error type for tickreplay.
#[derive(Debug, thiserror::Error)]
pub enum TickReplayError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    ConditionParse(#[from] ParseError),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("insufficient history for {asset}: have {rows} rows before {date}, need {needed}")]
    InsufficientHistory {
        asset: String,
        date: NaiveDate,
        rows: usize,
        needed: usize,
    },

    #[error("rolling window for {asset} holds {len} rows, expected {expected}")]
    WindowInvariant {
        asset: String,
        len: usize,
        expected: usize,
    },

    #[error("attempted to sell {asset}, which is not held")]
    NotHeld { asset: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TickReplayError {
    /// Whether the error aborts the run. Non-fatal errors only skip the order
    /// that produced them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TickReplayError::Price(_) | TickReplayError::DataUnavailable { .. }
        )
    }
}

impl From<&TickReplayError> for std::process::ExitCode {
    fn from(err: &TickReplayError) -> Self {
        let code: u8 = match err {
            TickReplayError::Io(_) | TickReplayError::Csv(_) => 1,
            TickReplayError::ConfigParse { .. }
            | TickReplayError::ConfigMissing { .. }
            | TickReplayError::ConfigInvalid { .. } => 2,
            TickReplayError::ConditionParse(_) => 4,
            TickReplayError::Price(_)
            | TickReplayError::DataUnavailable { .. }
            | TickReplayError::InsufficientHistory { .. } => 5,
            TickReplayError::WindowInvariant { .. } | TickReplayError::NotHeld { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
