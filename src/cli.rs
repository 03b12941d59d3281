//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestingState};
use crate::domain::clock::{Resolution, Tick};
use crate::domain::condition::Condition;
use crate::domain::condition_parser;
use crate::domain::config_validation::{
    self as validation, validate_backtest_config, validate_initial_holdings,
    validate_strategy_config,
};
use crate::domain::error::TickReplayError;
use crate::domain::market::MarketData;
use crate::domain::position::AssetClass;
use crate::domain::strategy::{Allocation, OptionParams, Strategy};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{DataPort, OptionDataPort};
use crate::ports::report_port::ReportPort;

pub const DEFAULT_DATA_DIR: &str = "price_data";
pub const DEFAULT_OUTPUT_DIR: &str = "results";

#[derive(Parser, Debug)]
#[command(name = "tickreplay", about = "Tick-by-tick strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overrides [backtest] data_dir
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Validate and load data without running
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols with price data
    ListSymbols {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long, default_value = "daily")]
        resolution: Resolution,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            data_dir,
            dry_run,
        } => run_backtest(&config, output.as_deref(), data_dir.as_deref(), dry_run),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols {
            data_dir,
            resolution,
        } => run_list_symbols(data_dir, resolution),
    }
}

fn fail(err: &TickReplayError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TickReplayError> {
    let start_date = validation::parse_date(
        adapter.get_string("backtest", "start_date").as_deref(),
        "start_date",
    )?;
    let end_date = validation::parse_date(
        adapter.get_string("backtest", "end_date").as_deref(),
        "end_date",
    )?;

    Ok(BacktestConfig {
        start_date,
        end_date,
        resolution: validation::resolution(adapter)?,
        initial_capital: adapter.get_double("backtest", "initial_capital", 10_000.0),
        fee: adapter.get_double("backtest", "fee", 0.0),
    })
}

/// Parse a condition, printing the input with a caret under the failure.
fn parse_condition(key: &str, input: &str) -> Result<Condition, TickReplayError> {
    condition_parser::parse(input).map_err(|e| {
        eprintln!(
            "error: failed to parse {}:\n{}",
            key,
            e.display_with_context(input)
        );
        TickReplayError::from(e)
    })
}

pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<Strategy, TickReplayError> {
    let name = adapter
        .get_string("strategy", "name")
        .unwrap_or_else(|| "Unnamed".to_string());
    let universe = validation::parse_assets(
        &adapter
            .get_string("strategy", "assets")
            .unwrap_or_default(),
    );

    let buy_when = adapter
        .get_string("strategy", "buy_when")
        .unwrap_or_default();
    let buying = parse_condition("buy_when", &buy_when)?;

    let selling = match adapter
        .get_string("strategy", "sell_when")
        .filter(|s| !s.trim().is_empty())
    {
        Some(s) => Some(parse_condition("sell_when", &s)?),
        None => None,
    };

    let mut strategy = Strategy::new(name, universe, buying);
    strategy.selling = selling;
    strategy.buying_allocation =
        validation::allocation(adapter, "buying_allocation", Allocation::Units(1))?;
    strategy.buying_basis = validation::allocation_basis(adapter)?;
    strategy.selling_allocation =
        validation::allocation(adapter, "selling_allocation", Allocation::Fraction(1.0))?;
    strategy.max_allocation = adapter.get_double("strategy", "maximum_allocation", 1.0);
    strategy.min_allocation = adapter.get_double("strategy", "minimum_allocation", 0.0);
    strategy.buying_delay = adapter.get_int("strategy", "buying_delay", 0);
    strategy.selling_delay = adapter.get_int("strategy", "selling_delay", 0);
    strategy.asset_class = validation::asset_class(adapter)?;
    strategy.profit_gate = validation::profit_gate(adapter)?;
    strategy.options = OptionParams {
        right: validation::option_right(adapter)?,
        strikes_above: validation::strikes_above(adapter)?,
        spread: adapter.get_bool("strategy", "spread", false),
    };
    Ok(strategy)
}

pub fn benchmark_weights(adapter: &dyn ConfigPort) -> Result<Vec<(String, f64)>, TickReplayError> {
    match adapter
        .get_string("backtest", "benchmark")
        .filter(|s| !s.trim().is_empty())
    {
        None => Ok(Vec::new()),
        Some(s) => validation::parse_benchmark(&s).map_err(|reason| {
            TickReplayError::ConfigInvalid {
                section: "backtest".into(),
                key: "benchmark".into(),
                reason,
            }
        }),
    }
}

/// Validate every section and build a ready-to-run state.
///
/// Loads series for the universe, the initial holdings and the benchmark,
/// then seeds `[initial_holdings]` at the opening price of the first day.
pub fn prepare(
    adapter: &dyn ConfigPort,
    data: &dyn DataPort,
    option_source: Option<Box<dyn OptionDataPort>>,
) -> Result<(BacktestConfig, BacktestingState), TickReplayError> {
    validate_backtest_config(adapter)?;
    validate_strategy_config(adapter)?;
    validate_initial_holdings(adapter)?;

    let config = build_backtest_config(adapter)?;
    let strategy = build_strategy(adapter)?;
    let holdings = validation::initial_holdings(adapter)?;
    let weights = benchmark_weights(adapter)?;

    let mut symbols: Vec<String> = strategy.universe.clone();
    for symbol in holdings
        .iter()
        .map(|(s, _)| s)
        .chain(weights.iter().map(|(s, _)| s))
    {
        if !symbols.contains(symbol) {
            symbols.push(symbol.clone());
        }
    }

    let mut series = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let loaded = data.load_series(symbol)?;
        info!(symbol = %symbol, rows = loaded.len(), "loaded price series");
        series.push(loaded);
    }

    let mut market = MarketData::new(series);
    if let Some(source) = option_source {
        market = market.with_option_source(source);
    }

    let seed_class = match strategy.asset_class {
        AssetClass::Option => AssetClass::Equity,
        other => other,
    };
    let mut state = BacktestingState::new(&config, strategy, market).with_benchmark(weights);

    let open = Tick::open(config.resolution);
    for (symbol, dollars) in holdings {
        let quantity = state.portfolio.seed_holding(
            &state.market,
            &symbol,
            seed_class,
            dollars,
            config.start_date,
            open,
        )?;
        info!(symbol = %symbol, quantity, "seeded initial holding");
    }

    Ok((config, state))
}

#[cfg(feature = "tradier")]
fn option_source(strategy_class: AssetClass) -> Result<Option<Box<dyn OptionDataPort>>, TickReplayError> {
    use crate::adapters::tradier_adapter::TradierAdapter;

    if strategy_class != AssetClass::Option {
        return Ok(None);
    }
    Ok(Some(Box::new(TradierAdapter::from_env()?)))
}

#[cfg(not(feature = "tradier"))]
fn option_source(strategy_class: AssetClass) -> Result<Option<Box<dyn OptionDataPort>>, TickReplayError> {
    if strategy_class != AssetClass::Option {
        return Ok(None);
    }
    Err(TickReplayError::ConfigInvalid {
        section: "strategy".into(),
        key: "asset_class".into(),
        reason: "option strategies need the tradier feature".into(),
    })
}

fn data_dir(cli_override: Option<&Path>, adapter: &dyn ConfigPort) -> PathBuf {
    match cli_override {
        Some(dir) => dir.to_path_buf(),
        None => adapter
            .get_string("backtest", "data_dir")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
    }
}

fn run_backtest(
    config_path: &Path,
    output: Option<&Path>,
    data_dir_override: Option<&Path>,
    dry_run: bool,
) -> ExitCode {
    info!(config = %config_path.display(), "loading config");
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let resolution = match validation::resolution(&adapter) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let class = match validation::asset_class(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let options = if dry_run {
        Ok(None)
    } else {
        option_source(class)
    };
    let options = match options {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };

    let data = CsvAdapter::new(data_dir(data_dir_override, &adapter), resolution);
    let (config, mut state) = match prepare(&adapter, &data, options) {
        Ok(prepared) => prepared,
        Err(e) => return fail(&e),
    };

    if dry_run {
        let ticks = config.total_ticks().unwrap_or(0);
        eprintln!("Dry run: configuration is valid.");
        eprintln!("  Strategy:   {}", state.strategy.name);
        eprintln!("  Assets:     {}", state.strategy.universe.join(", "));
        eprintln!("  Range:      {} to {}", config.start_date, config.end_date);
        eprintln!("  Resolution: {} ({} ticks)", config.resolution, ticks);
        eprintln!("  Capital:    {:.2}", state.portfolio.initial_value());
        return ExitCode::SUCCESS;
    }

    let result = match backtest_engine::run_backtest(&mut state, &config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    let output_dir = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let Some(output_str) = output_dir.to_str() else {
        eprintln!("error: output path is not valid UTF-8");
        return ExitCode::from(1);
    };
    if let Err(e) = CsvReportAdapter::new().write(&result, &state.strategy, output_str) {
        return fail(&e);
    }

    println!("{}", result.snapshot);
    info!(output = %output_dir.display(), "report written");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    for result in [
        validate_backtest_config(&adapter),
        validate_strategy_config(&adapter),
        validate_initial_holdings(&adapter),
    ] {
        if let Err(e) = result {
            if matches!(e, TickReplayError::ConditionParse(_)) {
                for key in ["buy_when", "sell_when"] {
                    let Some(input) = adapter.get_string("strategy", key) else {
                        continue;
                    };
                    if let Err(parse) = condition_parser::parse(&input) {
                        eprintln!("  {}:\n{}", key, parse.display_with_context(&input));
                    }
                }
            }
            return fail(&e);
        }
    }

    for key in ["buy_when", "sell_when"] {
        if let Some(input) = adapter
            .get_string("strategy", key)
            .filter(|s| !s.trim().is_empty())
        {
            eprintln!("  {:<9} {}", format!("{}:", key), input.trim());
        }
    }
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_list_symbols(data_dir: PathBuf, resolution: Resolution) -> ExitCode {
    let adapter = CsvAdapter::new(data_dir, resolution);
    match adapter.list_symbols() {
        Ok(symbols) => {
            if symbols.is_empty() {
                warn!("no symbols found");
            }
            for symbol in symbols {
                println!("{}", symbol);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
