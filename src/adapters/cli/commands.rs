//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the tiered trader.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::bars::{export_csv, export_json, load_bars};
use crate::adapters::paper::{PaperExecution, PaperPortfolio};
use crate::adapters::snapshot_file::FileSnapshotFeed;
use crate::application::{ReplayConfig, ReplayDriver, ReplayReport, TradingEngine, TradingOrchestrator};
use crate::application::replay::IntrabarPolicy;
use crate::config::{load_config, Config};
use crate::domain::snapshot::{IndicatorSnapshot, Timeframe};
use crate::ports::notifier::LogNotifier;
use crate::strategy::{EntryClassifier, RegimeClassifier};

/// Tiered Trader - Regime-aware tiered position lifecycle engine
#[derive(Parser, Debug)]
#[command(
    name = "tiered-trader",
    version = env!("CARGO_PKG_VERSION"),
    about = "Regime-aware tiered position lifecycle engine",
    long_about = "Classifies the market regime, matches SWING / MOMENTUM / SCALP entry setups, \
                  sizes positions from stop distance and manages every open position through \
                  partial profit, trailing stop, target and time exits."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the slow cycle and the watchdog
    Run(RunCmd),

    /// Replay historical bars through the decision path
    Backtest(BacktestCmd),

    /// Show the regime and per-tier verdicts for one snapshot
    Classify(ClassifyCmd),

    /// Validate a configuration file and print the tier table
    CheckConfig(CheckConfigCmd),
}

impl Command {
    fn config_path(&self) -> &Path {
        match self {
            Command::Run(cmd) => &cmd.config,
            Command::Backtest(cmd) => &cmd.config,
            Command::Classify(cmd) => &cmd.config,
            Command::CheckConfig(cmd) => &cmd.config,
        }
    }
}

/// Start the trading loops
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Force paper trading regardless of the config
    #[arg(short, long)]
    pub paper: bool,

    /// Override the snapshot file
    #[arg(long, value_name = "FILE")]
    pub snapshots: Option<PathBuf>,
}

/// Run a replay
#[derive(Parser, Debug)]
pub struct BacktestCmd {
    /// CSV file of base bars (time,open,high,low,close,volume)
    #[arg(short, long, value_name = "CSV")]
    pub bars: PathBuf,

    /// Symbol the bars belong to
    #[arg(short, long, value_name = "SYMBOL", default_value = "REPLAY")]
    pub symbol: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Timeframe of the input bars
    #[arg(long, value_name = "TIMEFRAME", default_value = "1h")]
    pub base_timeframe: Timeframe,

    /// Starting capital (defaults to engine.starting_balance)
    #[arg(long, value_name = "AMOUNT")]
    pub capital: Option<f64>,

    /// Intrabar policy: close-only or worst-case
    #[arg(long, value_name = "POLICY", default_value = "close-only")]
    pub intrabar: IntrabarPolicy,

    /// Leave a position open at the end instead of closing it
    #[arg(long)]
    pub keep_open: bool,

    /// Print every trade
    #[arg(short, long)]
    pub trades: bool,

    /// Export the ledger to CSV
    #[arg(long, value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// Export the full report to JSON
    #[arg(long, value_name = "FILE")]
    pub export_json: Option<PathBuf>,
}

/// Classify one snapshot
#[derive(Parser, Debug)]
pub struct ClassifyCmd {
    /// JSON file holding one indicator snapshot
    #[arg(short, long, value_name = "JSON")]
    pub snapshot: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    // The config may not load; the command itself reports that
    let config_level = load_config(app.command.config_path())
        .ok()
        .map(|c| c.logging.get_level());
    init_logging(app.verbose, app.debug, config_level)?;

    match app.command {
        Command::Run(cmd) => run_command(cmd).await,
        Command::Backtest(cmd) => backtest_command(cmd),
        Command::Classify(cmd) => classify_command(cmd),
        Command::CheckConfig(cmd) => check_config_command(cmd),
    }
}

/// Initialize logging system
fn init_logging(verbose: bool, debug: bool, config_level: Option<String>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug".to_string()
    } else if verbose {
        "info".to_string()
    } else {
        config_level.unwrap_or_else(|| "warn".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

fn load(path: &Path) -> Result<Config> {
    load_config(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Handle run command
async fn run_command(cmd: RunCmd) -> Result<()> {
    tracing::info!("Starting tiered trader...");

    let config = load(&cmd.config)?;
    let paper = cmd.paper || config.engine.paper;
    if !paper {
        anyhow::bail!(
            "Live execution is not available: set [engine] paper = true or pass --paper"
        );
    }

    let snapshot_file = cmd
        .snapshots
        .clone()
        .unwrap_or_else(|| config.engine.get_snapshot_file());
    let portfolio = PaperPortfolio::from_f64(config.engine.starting_balance)
        .context("Invalid starting balance")?;

    let engine = TradingEngine::new(
        Arc::new(FileSnapshotFeed::new(&snapshot_file)),
        Arc::new(PaperExecution::new()),
        Arc::new(portfolio),
        Arc::new(LogNotifier),
    )
    .with_thresholds(config.regime.clone())
    .with_tier_table(config.tiers.clone())
    .with_circuit_breaker(config.risk.circuit_breaker())
    .with_portfolio_cap(config.risk.portfolio_cap_fraction);

    let orchestrator = TradingOrchestrator::new(Arc::new(engine), config.engine.symbols.clone(), paper)
        .context("Failed to create orchestrator")?
        .with_cycle_interval(Duration::from_secs(config.engine.cycle_interval_secs))
        .with_watchdog_interval(Duration::from_secs(config.engine.watchdog_interval_secs));

    // Setup Ctrl+C handler
    let orch = orchestrator.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        orch.stop().await;
    });

    tracing::warn!(
        "PAPER TRADING MODE - fills are simulated, snapshots from {}",
        snapshot_file.display()
    );

    orchestrator.run().await?;

    let status = orchestrator.status().await;
    tracing::info!(
        "Tiered trader stopped after {} cycles, {} watchdog passes, {} open positions",
        status.cycles,
        status.watchdog_passes,
        status.open_positions.len()
    );
    Ok(())
}

/// Handle backtest command
fn backtest_command(cmd: BacktestCmd) -> Result<()> {
    let config = load(&cmd.config)?;
    let bars = load_bars(&cmd.bars)
        .with_context(|| format!("Failed to load bars from {}", cmd.bars.display()))?;

    let replay_config = ReplayConfig {
        symbol: cmd.symbol.clone(),
        base_timeframe: cmd.base_timeframe,
        starting_balance: cmd.capital.unwrap_or(config.engine.starting_balance),
        portfolio_cap_fraction: config.risk.portfolio_cap_fraction,
        intrabar: cmd.intrabar,
        force_close_at_end: !cmd.keep_open,
        indicators: config.indicators.clone(),
    };

    let driver = ReplayDriver::new(replay_config, config.tiers.clone(), config.regime.clone())
        .context("Invalid replay parameters")?;
    let report = driver.run(&bars).context("Replay failed")?;

    print_report(&report, cmd.trades);

    if let Some(path) = &cmd.export_csv {
        let csv = export_csv(&report)?;
        std::fs::write(path, csv).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Ledger written to {}", path.display());
    }
    if let Some(path) = &cmd.export_json {
        let json = export_json(&report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_report(report: &ReplayReport, trades: bool) {
    let s = &report.summary;

    println!("Replay: {} ({} bars)", report.symbol, report.bars);
    println!("========================================");
    println!("Trades:          {}", s.trades);
    println!("Wins / Losses:   {} / {}", s.wins, s.losses);
    println!("Win rate:        {:.1}%", s.win_rate * 100.0);
    println!("Total PnL:       {:.2}", s.total_pnl);
    println!(
        "Balance:         {:.2} -> {:.2} ({:+.2}%)",
        report.starting_balance,
        report.final_balance,
        report.return_pct()
    );
    println!("Partial exits:   {}", s.partial_exits);
    println!(
        "Exits:           {} stop ({} trailing), {} target, {} time",
        s.stop_exits, s.trailing_stop_exits, s.target_exits, s.time_exits
    );
    println!("Rejected:        {}", report.rejected_entries);

    let regimes: Vec<String> = report
        .regime_counts()
        .iter()
        .map(|(regime, bars)| format!("{} {}", regime, bars))
        .collect();
    println!("Regimes:         {}", regimes.join(", "));

    if let Some(position) = &report.open_position {
        println!(
            "Still open:      {} {} @ {:.4}, qty {:.8}",
            position.tier(),
            position.id(),
            position.entry_price(),
            position.remaining_quantity()
        );
    }

    if trades {
        println!();
        for record in &report.ledger.records {
            println!("{}", record);
        }
    }
}

/// Handle classify command
fn classify_command(cmd: ClassifyCmd) -> Result<()> {
    let config = load(&cmd.config)?;
    let content = std::fs::read_to_string(&cmd.snapshot)
        .with_context(|| format!("Failed to read {}", cmd.snapshot.display()))?;
    let snapshot: IndicatorSnapshot =
        serde_json::from_str(&content).context("Failed to parse snapshot")?;
    if !snapshot.is_well_formed() {
        anyhow::bail!("Snapshot for {} is malformed", snapshot.symbol);
    }

    let reading = RegimeClassifier::new(config.regime.clone()).classify(&snapshot);
    println!(
        "{} @ {:.4}: {} (confidence {:.2}, ADX {:.1}, ATR ratio {:.4})",
        snapshot.symbol,
        snapshot.price,
        reading.regime,
        reading.confidence,
        reading.adx,
        reading.atr_ratio
    );

    let classifier = EntryClassifier::new(config.tiers.clone());
    for verdict in classifier.explain(&reading, &snapshot) {
        match verdict.outcome {
            Ok(candidate) => println!(
                "  {:<9} MATCH  stop {:.4}  target {:.4}  R:R {:.2}  confidence {:.2}",
                verdict.tier.to_string(),
                candidate.stop_loss,
                candidate.final_target_price,
                candidate.reward_risk(),
                candidate.confidence
            ),
            Err(rejection) => println!("  {:<9} no     {}", verdict.tier.to_string(), rejection),
        }
    }

    Ok(())
}

/// Handle check-config command
fn check_config_command(cmd: CheckConfigCmd) -> Result<()> {
    let config = load(&cmd.config)?;

    println!("Configuration OK: {}", cmd.config.display());
    println!(
        "Symbols: {} | cycle {}s | watchdog {}s | paper {}",
        config.engine.symbols.join(", "),
        config.engine.cycle_interval_secs,
        config.engine.watchdog_interval_secs,
        config.engine.paper
    );
    println!(
        "Regime: {} reference, strong ADX {}, weak ADX {}, volatile ATR {:.2}%",
        config.regime.reference_timeframe,
        config.regime.strong_adx,
        config.regime.weak_adx,
        config.regime.volatile_atr_ratio * 100.0
    );
    println!();
    println!(
        "{:<9} {:>4} {:>6} {:>6} {:>6} {:>14} {:>7} {:>6} {:>6}  regimes",
        "tier", "tf", "alloc", "risk", "stop", "partial", "final", "trail", "hold"
    );
    for tier in config.tiers.iter() {
        let partial = if tier.has_partial() {
            format!(
                "+{:.1}% x {:.0}%",
                tier.partial_tp_pct * 100.0,
                tier.partial_tp_fraction * 100.0
            )
        } else {
            "-".to_string()
        };
        let regimes: Vec<String> = tier.allowed_regimes.iter().map(|r| r.to_string()).collect();
        println!(
            "{:<9} {:>4} {:>6.2} {:>5.2}% {:>5.1}A {:>14} {:>6.1}% {:>5.1}A {:>5}h  {}{}",
            tier.tier.to_string(),
            tier.primary_timeframe.to_string(),
            tier.capital_allocation,
            tier.risk_per_trade * 100.0,
            tier.stop_atr_multiple,
            partial,
            tier.final_target_pct * 100.0,
            tier.trailing_atr_multiple,
            tier.max_hold_hours,
            regimes.join("/"),
            if tier.is_enabled() { "" } else { " (disabled)" }
        );
        println!("          {} conditions", tier.conditions.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backtest_args() {
        let app = CliApp::try_parse_from([
            "tiered-trader",
            "backtest",
            "--bars",
            "data/btc.csv",
            "--symbol",
            "BTC/USDT",
            "--base-timeframe",
            "15m",
            "--intrabar",
            "worst-case",
        ])
        .unwrap();

        match app.command {
            Command::Backtest(cmd) => {
                assert_eq!(cmd.base_timeframe, Timeframe::M15);
                assert_eq!(cmd.intrabar, IntrabarPolicy::WorstCase);
                assert_eq!(cmd.config, PathBuf::from("config/default.toml"));
                assert!(cmd.capital.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let app = CliApp::try_parse_from(["tiered-trader", "check-config", "--debug"]).unwrap();
        assert!(app.debug);
        assert!(matches!(app.command, Command::CheckConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_timeframe() {
        let result = CliApp::try_parse_from([
            "tiered-trader",
            "backtest",
            "--bars",
            "bars.csv",
            "--base-timeframe",
            "3h",
        ]);
        assert!(result.is_err());
    }
}
