// Gold Price Calculator - Web Server
// JSON API over the same Calculator the TUI and CLI use

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use gold_calculator::{
    build_config, open_calculator, CalculationEntry, CalculationOutcome, Calculator,
    CalculatorError, CliOverrides, PriceSourceMode, PricedRates, Provenance, PurityTier,
    StorageMode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Gold price calculator JSON API
#[derive(Parser, Debug)]
#[command(name = "gold-server")]
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

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    calculator: Arc<Mutex<Calculator>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Rates response
#[derive(Serialize)]
struct RatesResponse {
    provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_of: Option<DateTime<Utc>>,
    rates: Vec<TierRate>,
}

#[derive(Serialize)]
struct TierRate {
    tier: PurityTier,
    rate: Decimal,
}

impl From<&PricedRates> for RatesResponse {
    fn from(priced: &PricedRates) -> Self {
        Self {
            provenance: priced.provenance,
            as_of: priced.as_of,
            rates: priced
                .table
                .iter()
                .map(|(tier, rate)| TierRate { tier, rate })
                .collect(),
        }
    }
}

/// Calculate request; grams may be a JSON number or a string
#[derive(Deserialize)]
struct CalculateRequest {
    tier: String,
    grams: GramsInput,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GramsInput {
    Number(serde_json::Number),
    Text(String),
}

impl GramsInput {
    fn as_input(&self) -> String {
        match self {
            GramsInput::Number(n) => n.to_string(),
            GramsInput::Text(s) => s.clone(),
        }
    }
}

/// Calculate response: entry plus the displayed (2 dp) breakdown
#[derive(Serialize)]
struct CalculateResponse {
    entry: CalculationEntry,
    base: Decimal,
    tax: Decimal,
    fee: Decimal,
    total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl From<CalculationOutcome> for CalculateResponse {
    fn from(outcome: CalculationOutcome) -> Self {
        let shown = outcome.breakdown.rounded();
        Self {
            entry: outcome.entry,
            base: shown.base,
            tax: shown.tax,
            fee: shown.fee,
            total: shown.total,
            warning: outcome.warning,
        }
    }
}

fn error_response(e: &CalculatorError) -> Response {
    let status = match e {
        CalculatorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CalculatorError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        CalculatorError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ApiResponse::err(e.to_string()))).into_response()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/rates - Current per-gram rates
async fn get_rates(State(state): State<AppState>) -> impl IntoResponse {
    let calculator = state.calculator.lock().await;
    Json(ApiResponse::ok(RatesResponse::from(calculator.rates())))
}

/// POST /api/rates/refresh - Walk the source ladder again
async fn refresh_rates(State(state): State<AppState>) -> impl IntoResponse {
    let mut calculator = state.calculator.lock().await;
    let rates = calculator.refresh_rates().await;
    Json(ApiResponse::ok(RatesResponse::from(rates)))
}

/// POST /api/calculate - Price a weight and record it
async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<CalculateRequest>,
) -> Response {
    let tier = match PurityTier::from_str(&request.tier) {
        Ok(tier) => tier,
        Err(e) => return error_response(&e),
    };

    let mut calculator = state.calculator.lock().await;
    match calculator.calculate(tier, &request.grams.as_input()).await {
        Ok(outcome) => {
            (StatusCode::OK, Json(ApiResponse::ok(CalculateResponse::from(outcome)))).into_response()
        }
        Err(e) => {
            tracing::debug!("Calculation rejected: {}", e);
            error_response(&e)
        }
    }
}

/// GET /api/history - Recent calculations, newest first
async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    let calculator = state.calculator.lock().await;
    Json(ApiResponse::ok(calculator.history().entries().to_vec()))
}

/// DELETE /api/history - Remove every calculation
async fn clear_history(State(state): State<AppState>) -> Response {
    let mut calculator = state.calculator.lock().await;
    match calculator.clear_history().await {
        Ok(()) => Json(ApiResponse::ok("cleared")).into_response(),
        Err(e) => {
            tracing::error!("Error clearing history: {}", e);
            error_response(&e)
        }
    }
}

/// DELETE /api/history/:id - Remove one calculation
async fn delete_entry(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut calculator = state.calculator.lock().await;

    if calculator.history().find(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("No calculation with id {}", id))),
        )
            .into_response();
    }

    match calculator.delete_entry(&id).await {
        Ok(()) => Json(ApiResponse::ok(id)).into_response(),
        Err(e) => {
            tracing::error!(id = %id, "Error deleting entry: {}", e);
            error_response(&e)
        }
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/rates", get(get_rates))
        .route("/rates/refresh", post(refresh_rates))
        .route("/calculate", post(calculate))
        .route("/history", get(get_history).delete(clear_history))
        .route("/history/:id", delete(delete_entry))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

/// Re-run the source ladder every `period`; the first tick is skipped since
/// the calculator resolved rates on open.
fn spawn_refresh_task(state: AppState, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut calculator = state.calculator.lock().await;
            let provenance = calculator.refresh_rates().await.provenance;
            tracing::debug!(%provenance, "Scheduled rate refresh");
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let overrides = CliOverrides {
        config_file: args.config,
        database_path: args.db,
        storage: args.storage,
        price_source: args.price_source,
        log_level: args.log_level,
    };
    let mut config = build_config(&overrides).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🌐 Gold Price Calculator - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut calculator = open_calculator(&config).await?;
    for warning in calculator.take_warnings() {
        tracing::warn!("{}", warning);
    }
    println!(
        "✓ History: {} | Rates: {}",
        calculator.store_name(),
        calculator.rates().provenance
    );

    let state = AppState {
        calculator: Arc::new(Mutex::new(calculator)),
    };

    let period = config
        .refresh_interval()?
        .to_std()
        .context("Refresh interval out of range")?;
    spawn_refresh_task(state.clone(), period);

    let app = build_router(state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/rates", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
