//! pit-backtest CLI - run point-in-time backtests from CSV artifacts
//!
//! ## Example Usage
//!
//! ```bash
//! # Build the quarterly universe timeline from membership events
//! pit-backtest timeline --events events.csv -o timeline.csv
//!
//! # Walk forward over a factor panel, then price the picks
//! pit-backtest --config backtest.toml run --panel panel.csv --timeline timeline.csv \
//!     --prices prices.csv -o results/
//!
//! # Rebuild equity curves from saved predictions
//! pit-backtest equity --predictions results/predictions.csv --prices prices.csv -o results/
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use pit_backtest::config::BacktestConfig;
use pit_backtest::data::PriceTable;
use pit_backtest::engine::{QuarterlyPrediction, WalkForwardSimulator};
use pit_backtest::io;
use pit_backtest::model::SoftmaxRegression;
use pit_backtest::performance::{EquityCurveBuilder, PerformanceSummary};
use pit_backtest::pipeline::FiveCategoryTarget;
use pit_backtest::report::RunReport;
use pit_backtest::universe::build_timeline;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

/// pit-backtest: point-in-time walk-forward stock-ranking backtester
#[derive(Parser)]
#[command(name = "pit-backtest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Robert Fall")]
#[command(about = "Point-in-time walk-forward stock-ranking backtester", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the quarterly universe timeline from membership events
    Timeline {
        /// Events CSV (date, added, removed)
        #[arg(short = 'e', long)]
        events: PathBuf,

        /// First year of the timeline (default: config start year)
        #[arg(long)]
        start_year: Option<i32>,

        /// Last year of the timeline (default: config end year)
        #[arg(long)]
        end_year: Option<i32>,

        /// Output CSV
        #[arg(short = 'o', long, default_value = "timeline.csv")]
        output: PathBuf,
    },

    /// Run the walk-forward simulation over a factor panel
    Run {
        /// Factor panel CSV (date, Ticker, factors...)
        #[arg(short = 'p', long)]
        panel: PathBuf,

        /// Universe timeline CSV
        #[arg(short = 't', long)]
        timeline: PathBuf,

        /// Prices CSV (date, symbol, close); builds equity curves when given
        #[arg(long)]
        prices: Option<PathBuf>,

        /// Picks per quarter (overrides config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },

    /// Build strategy and benchmark equity curves from saved predictions
    Equity {
        /// Predictions CSV written by `run`
        #[arg(long)]
        predictions: PathBuf,

        /// Prices CSV (date, symbol, close)
        #[arg(long)]
        prices: PathBuf,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<BacktestConfig> {
    if let Some(path) = path {
        return BacktestConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }

    if let Some(home) = dirs::home_dir() {
        let default_config = home.join(".pit-backtest").join("config.toml");
        if default_config.exists() {
            return BacktestConfig::from_file(&default_config)
                .with_context(|| format!("failed to load config {}", default_config.display()));
        }
    }

    Ok(BacktestConfig::default())
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| {
        if cli.verbose {
            println!(
                "{} v{}",
                "pit-backtest".cyan().bold(),
                env!("CARGO_PKG_VERSION")
            );
            println!(
                "Window: {} .. {} (split {})",
                config.start_date, config.end_date, config.train_end_date
            );
        }

        match cli.command {
            Commands::Timeline {
                events,
                start_year,
                end_year,
                output,
            } => build_universe(&config, &events, start_year, end_year, &output),
            Commands::Run {
                panel,
                timeline,
                prices,
                top_k,
                output,
            } => run_simulation(config, &panel, &timeline, prices.as_deref(), top_k, &output),
            Commands::Equity {
                predictions,
                prices,
                output,
            } => build_equity(&config, &predictions, &prices, &output),
        }
    });

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn build_universe(
    config: &BacktestConfig,
    events_path: &Path,
    start_year: Option<i32>,
    end_year: Option<i32>,
    output: &Path,
) -> Result<()> {
    let events = io::read_events(events_path)
        .with_context(|| format!("failed to read events {}", events_path.display()))?;
    let (default_start, default_end) = config.universe_years();
    let timeline = build_timeline(
        &events,
        start_year.unwrap_or(default_start),
        end_year.unwrap_or(default_end),
    )?;
    io::write_timeline(output, &timeline)?;

    println!("{}", "Universe Timeline".green().bold());
    println!("{}", "=================".green());
    println!("  {} {}", "Events:".bold(), events.len());
    println!("  {} {}", "Snapshots:".bold(), timeline.len());
    println!("  {} {}", "Distinct members:".bold(), timeline.all_symbols().len());
    if let Some(last) = timeline.snapshots().last() {
        println!("  {} {} ({} members)", "Latest:".bold(), last.quarter_date, last.len());
    }
    println!("  {} {}", "Output:".bold(), output.display());
    Ok(())
}

fn run_simulation(
    mut config: BacktestConfig,
    panel_path: &Path,
    timeline_path: &Path,
    prices_path: Option<&Path>,
    top_k: Option<usize>,
    output: &Path,
) -> Result<()> {
    if let Some(k) = top_k {
        config.top_k = k;
    }
    config.validate()?;
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    println!("{}", "Running walk-forward simulation...".cyan().bold());
    let started = Instant::now();

    let panel = io::read_panel(panel_path)
        .with_context(|| format!("failed to read panel {}", panel_path.display()))?
        .restrict(config.start_date, config.end_date);
    let timeline = io::read_timeline(timeline_path)
        .with_context(|| format!("failed to read timeline {}", timeline_path.display()))?;
    if timeline.is_empty() {
        bail!("universe timeline {} is empty", timeline_path.display());
    }

    let labeled = FiveCategoryTarget::new().label(&panel)?;
    let simulator = WalkForwardSimulator::new(&config, SoftmaxRegression::factory())?;

    let pb = ProgressBar::new(simulator.quarters().len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let result = simulator.run_observed(&labeled, &timeline, |quarter, predicted| {
        pb.set_message(format!("{} {}", quarter, if predicted { "ok" } else { "skipped" }));
        pb.inc(1);
    })?;
    pb.finish_with_message("Simulation complete!");
    println!();

    io::write_predictions(&output.join("predictions.csv"), &result.predictions)?;
    io::write_json(&output.join("windows.json"), &result.windows)?;

    let mut report = result.report.clone();
    if let Some(prices_path) = prices_path {
        let prices = io::read_prices(prices_path)
            .with_context(|| format!("failed to read prices {}", prices_path.display()))?;
        let summary = write_curves(&config, &result.predictions, &prices, output, &mut report)?;
        println!("{}", summary);
    }
    io::write_json(&output.join("report.json"), &report)?;

    println!("{}", "Simulation Summary".green().bold());
    println!("{}", "==================".green());
    println!("  {} {}", "Panel rows:".bold(), panel.len());
    println!("  {} {}", "Labeled rows:".bold(), labeled.len());
    println!("  {} {}", "Quarters:".bold(), simulator.quarters().len());
    println!("  {} {}", "Predictions:".bold(), result.predictions.len());
    println!(
        "  {} {:.2}s",
        "Elapsed:".bold(),
        started.elapsed().as_secs_f64()
    );
    println!();
    print_report(&report);
    println!("Results written to {}", output.display().to_string().bright_green());
    Ok(())
}

fn build_equity(
    config: &BacktestConfig,
    predictions_path: &Path,
    prices_path: &Path,
    output: &Path,
) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let predictions = io::read_predictions(predictions_path)
        .with_context(|| format!("failed to read predictions {}", predictions_path.display()))?;
    if predictions.is_empty() {
        bail!("no predictions in {}", predictions_path.display());
    }
    let prices = io::read_prices(prices_path)
        .with_context(|| format!("failed to read prices {}", prices_path.display()))?;

    let mut report = RunReport::new();
    let summary = write_curves(config, &predictions, &prices, output, &mut report)?;
    println!("{}", summary);
    print_report(&report);
    Ok(())
}

fn write_curves(
    config: &BacktestConfig,
    predictions: &[QuarterlyPrediction],
    prices: &PriceTable,
    output: &Path,
    report: &mut RunReport,
) -> Result<PerformanceSummary> {
    let builder = EquityCurveBuilder::new(config.initial_equity, config.price_lookback_days);
    let start = config.train_end_date;
    let equity = builder.compute_curve(predictions, prices, start, config.end_date);
    let benchmark = builder.compute_benchmark(
        &config.benchmark_symbol,
        predictions,
        prices,
        start,
        config.end_date,
    );

    io::write_equity(&output.join("equity.csv"), &equity, io::EQUITY_HEADER)?;
    if benchmark.is_empty() {
        println!(
            "{} no {} prices, benchmark curve not written",
            "Warning:".yellow(),
            config.benchmark_symbol
        );
    } else {
        io::write_equity(
            &output.join("benchmark_equity.csv"),
            &benchmark,
            io::BENCHMARK_HEADER,
        )?;
    }

    let summary = PerformanceSummary::compare(&equity, &benchmark);
    io::write_json(&output.join("summary.json"), &summary)?;

    report.merge(equity.report);
    report.merge(benchmark.report);
    Ok(summary)
}

fn print_report(report: &RunReport) {
    if report.is_clean() {
        println!("{}", "No units skipped.".green());
        return;
    }
    print!("{}", report);
    for skip in report.skips() {
        println!("  {} {}: {}", "-".yellow(), skip.unit, skip.reason.dimmed());
    }
    println!();
}
