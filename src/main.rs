// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gold_calculator::{
    build_config, export_csv, format_inr, open_calculator, AppConfig, Calculator, CliOverrides,
    PriceSourceMode, PurityTier, StorageMode,
};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Gold price calculator (INR) - rates, markup, rolling history
#[derive(Parser, Debug)]
#[command(name = "gold-calculator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite file for history and the rate cache
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// History storage: local or remote
    #[arg(long, value_parser = StorageMode::from_str)]
    storage: Option<StorageMode>,

    /// Rate source: live or fixed
    #[arg(long, value_parser = PriceSourceMode::from_str)]
    price_source: Option<PriceSourceMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GOLD_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive terminal UI (default)
    Ui,
    /// Show current per-gram rates and where they came from
    Rates,
    /// Price a weight in grams and record it
    Calc {
        /// Weight in grams
        grams: String,
        /// Purity tier: 24K, 22K or 18K
        #[arg(short, long, default_value = "24K", value_parser = PurityTier::from_str)]
        tier: PurityTier,
    },
    /// List recent calculations, newest first
    History,
    /// Delete one calculation by id
    Delete { id: String },
    /// Delete every calculation
    Clear,
    /// Write the history to a CSV file
    Export { path: PathBuf },
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_file: self.config.clone(),
            database_path: self.db.clone(),
            storage: self.storage,
            price_source: self.price_source,
            log_level: self.log_level.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args.overrides()).context("Failed to load configuration")?;
    let command = args.command.unwrap_or(Command::Ui);

    let interactive = matches!(command, Command::Ui);
    init_tracing(&config, interactive)?;
    tracing::debug!(?config, "Configuration loaded");

    let runtime = Runtime::new().context("Failed to start async runtime")?;
    let mut calculator = runtime.block_on(open_calculator(&config))?;

    // The TUI shows startup warnings in its status bar
    if !interactive {
        for warning in calculator.take_warnings() {
            eprintln!("⚠️  {}", warning);
        }
    }

    match command {
        Command::Ui => run_ui_mode(&runtime, calculator, &config),
        Command::Rates => {
            print_rates(&calculator);
            Ok(())
        }
        Command::Calc { grams, tier } => run_calc(&runtime, &mut calculator, tier, &grams),
        Command::History => {
            print_history(&calculator);
            Ok(())
        }
        Command::Delete { id } => {
            if calculator.history().find(&id).is_none() {
                eprintln!("No calculation with id {} in recent history", id);
            }
            runtime.block_on(calculator.delete_entry(&id))?;
            println!("✓ Deleted {}", id);
            Ok(())
        }
        Command::Clear => {
            runtime.block_on(calculator.clear_history())?;
            println!("✓ History cleared");
            Ok(())
        }
        Command::Export { path } => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = export_csv(calculator.history(), file)?;
            println!("✓ Exported {} calculations to {}", rows, path.display());
            Ok(())
        }
    }
}

/// Stderr for one-shot commands; a log file next to the database for the TUI
fn init_tracing(config: &AppConfig, interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    if interactive {
        let log_path = config.database_path.with_extension("log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn run_calc(runtime: &Runtime, calculator: &mut Calculator, tier: PurityTier, grams: &str) -> Result<()> {
    let outcome = match runtime.block_on(calculator.calculate(tier, grams)) {
        Ok(outcome) => outcome,
        Err(e) if e.is_invalid_input() => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    let shown = outcome.breakdown.rounded();
    let entry = &outcome.entry;

    println!("🪙 {} gold, {} g @ ₹{}/g ({})", entry.tier, entry.grams, format_inr(entry.rate), entry.provenance);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Base price        ₹{:>16}", format_inr(shown.base));
    println!("  GST (3%)          ₹{:>16}", format_inr(shown.tax));
    println!("  Making (10%)      ₹{:>16}", format_inr(shown.fee));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Final price       ₹{:>16}", format_inr(shown.total));

    if let Some(warning) = &outcome.warning {
        eprintln!("\n⚠️  {}", warning);
    }

    Ok(())
}

fn print_rates(calculator: &Calculator) {
    let rates = calculator.rates();
    let as_of = rates
        .as_of
        .map(|t| t.with_timezone(&chrono::Local).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "built-in table".to_string());

    println!("📈 Gold rates per gram (INR) - {} ({})", rates.provenance, as_of);
    for (tier, rate) in rates.table.iter() {
        println!("  {:<4} ₹{:>12}", tier, format_inr(rate));
    }
}

fn print_history(calculator: &Calculator) {
    let history = calculator.history();
    if history.is_empty() {
        println!("No calculations yet.");
        return;
    }

    println!(
        "{:<36}  {:<20}  {:<4}  {:>10}  {:>16}  {}",
        "ID", "Date", "Tier", "Grams", "Final Price", "Rate"
    );
    for entry in history.entries() {
        println!(
            "{:<36}  {:<20}  {:<4}  {:>10}  {:>16}  {}",
            entry.id,
            entry
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%d/%m/%Y, %I:%M %p")
                .to_string(),
            entry.tier.as_str(),
            format!("{}g", entry.grams),
            format!("₹{}", format_inr(entry.total)),
            entry.provenance,
        );
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(runtime: &Runtime, calculator: Calculator, config: &AppConfig) -> Result<()> {
    let mut app = ui::App::new(calculator, config.refresh_interval()?);
    ui::run_ui(runtime, &mut app)?;
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_runtime: &Runtime, _calculator: Calculator, _config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the CLI: gold-calculator calc <GRAMS> --tier 22K");
    std::process::exit(1);
}
