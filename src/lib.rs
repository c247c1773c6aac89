// Gold Price Calculator - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod pricing;        // Pricing formula, tiers, rate table
pub mod history;        // Rolling history (cap 10)
pub mod source;         // Price source adapter: live -> cached -> fixed
pub mod store;          // HistoryStore seam
pub mod db;             // Local key-value store (SQLite)
pub mod remote;         // Remote document store (Firestore REST)
pub mod calculator;     // In-memory state + degradation rules

// Re-export commonly used types
pub use error::CalculatorError;
pub use config::{
    build_config, AppConfig, CliOverrides, ConfigError, PriceSourceMode, StorageMode,
};
pub use pricing::{
    compute_breakdown, format_inr, parse_grams, Breakdown, PurityTier, RateTable,
};
pub use history::{
    append_history, clear_history, CalculationEntry, History, Provenance, HISTORY_CAP,
};
pub use source::{
    MetalsApiClient, PriceSourceAdapter, PricedRates, QuoteFetcher, RateCache, RateQuote,
    RateSnapshot,
};
pub use store::{open_stores, HistoryStore};
pub use db::{export_csv, LocalStore};
pub use remote::FirestoreStore;
pub use calculator::{CalculationOutcome, Calculator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire up stores, adapter and calculator from a loaded config.
pub async fn open_calculator(config: &AppConfig) -> anyhow::Result<Calculator> {
    let (local, history_store) = open_stores(config)?;
    let adapter = PriceSourceAdapter::from_config(&config.quote, local)?;
    Ok(Calculator::open(adapter, history_store).await)
}
