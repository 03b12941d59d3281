//! tickreplay: tick-by-tick strategy backtester for equities, crypto and
//! single-leg or spread option positions.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
