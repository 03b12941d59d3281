//! Core domain types and logic.

pub mod clock;
pub mod ohlcv;
pub mod price;
pub mod option_symbol;
pub mod position;
pub mod portfolio;
pub mod market;
pub mod execution;
pub mod condition;
pub mod condition_parser;
pub mod strategy;
pub mod backtest;
pub mod config_validation;
pub mod error;
