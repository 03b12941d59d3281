//! CSV report adapter implementing ReportPort.
//!
//! Writes three files into the output directory:
//! `history.csv` (one row per recorded tick), `events.csv` (fills and
//! expirations) and `snapshot.txt` (end-of-run summary).

use std::fs;
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::TickReplayError;
use crate::domain::strategy::Strategy;
use crate::ports::report_port::ReportPort;

pub const HISTORY_FILE: &str = "history.csv";
pub const EVENTS_FILE: &str = "events.csv";
pub const SNAPSHOT_FILE: &str = "snapshot.txt";

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    fn write_rows<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<(), TickReplayError> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn render_summary(result: &BacktestResult, strategy: &Strategy) -> String {
    let mut out = String::new();
    out.push_str(&format!("Strategy: {}\n", strategy.name));
    out.push_str(&format!("Assets: {}\n", strategy.universe.join(", ")));
    out.push_str(&format!("Ticks recorded: {}\n", result.history.len()));
    out.push_str(&format!("Trades: {}\n\n", result.events.len()));
    out.push_str(&result.snapshot);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        result: &BacktestResult,
        strategy: &Strategy,
        output_path: &str,
    ) -> Result<(), TickReplayError> {
        let dir = Path::new(output_path);
        fs::create_dir_all(dir)?;

        Self::write_rows(&dir.join(HISTORY_FILE), &result.history)?;
        Self::write_rows(&dir.join(EVENTS_FILE), &result.events)?;
        fs::write(dir.join(SNAPSHOT_FILE), render_summary(result, strategy))?;
        Ok(())
    }
}
