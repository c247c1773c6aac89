//! Price source adapter.
//!
//! Resolves the per-gram rate table by walking a fallback ladder:
//!
//! 1. live quote from the metals endpoint (`live`)
//! 2. cached snapshot younger than the max age (`cached`)
//! 3. hardcoded table (`fixed`)
//!
//! Resolution never fails; the provenance says how degraded the answer is.

use crate::config::{PriceSourceMode, QuoteConfig};
use crate::error::{CalculatorError, Result};
use crate::history::Provenance;
use crate::pricing::{PurityTier, RateTable};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// COLLABORATOR SEAMS
// ============================================================================

/// Something that can quote gold per troy ounce
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch_ounce_price(&self) -> Result<Decimal>;
}

/// Rate table persisted after a successful live fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub rates: RateTable,
    pub updated_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}

pub trait RateCache: Send + Sync {
    fn load_snapshot(&self) -> Result<Option<RateSnapshot>>;
    fn save_snapshot(&self, snapshot: &RateSnapshot) -> Result<()>;
}

// ============================================================================
// RESOLVED RATES
// ============================================================================

/// One tier's rate plus where it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateQuote {
    pub rate: Decimal,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedRates {
    pub table: RateTable,
    pub provenance: Provenance,
    /// When the underlying quote was fetched (None for the fixed table)
    pub as_of: Option<DateTime<Utc>>,
}

impl PricedRates {
    pub fn fixed() -> Self {
        Self {
            table: RateTable::fixed(),
            provenance: Provenance::Fixed,
            as_of: None,
        }
    }

    pub fn quote(&self, tier: PurityTier) -> Option<RateQuote> {
        self.table.rate(tier).map(|rate| RateQuote {
            rate,
            provenance: self.provenance,
        })
    }
}

// ============================================================================
// METALS API CLIENT
// ============================================================================

#[derive(Debug, Deserialize)]
struct MetalsResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// HTTP client for a metals-price endpoint answering `{ rates: { INR: n } }`
pub struct MetalsApiClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    base: String,
    target: String,
}

impl MetalsApiClient {
    pub fn from_config(config: &QuoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CalculatorError::source_unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: config.api_url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base: config.base_currency.clone(),
            target: config.target_currency.clone(),
        })
    }

    fn extract_price(&self, body: MetalsResponse) -> Result<Decimal> {
        let price = body.rates.get(&self.target).copied().ok_or_else(|| {
            CalculatorError::source_unavailable(format!("response has no {} rate", self.target))
        })?;

        if !price.is_finite() || price <= 0.0 {
            return Err(CalculatorError::source_unavailable(format!(
                "non-positive {} rate: {}",
                self.target, price
            )));
        }

        Decimal::try_from(price)
            .map_err(|e| CalculatorError::source_unavailable(format!("bad rate {}: {}", price, e)))
    }
}

#[async_trait]
impl QuoteFetcher for MetalsApiClient {
    async fn fetch_ounce_price(&self) -> Result<Decimal> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CalculatorError::source_unavailable("no API key configured"))?;

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("access_key", api_key),
                ("base", self.base.as_str()),
                ("symbols", self.target.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CalculatorError::source_unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CalculatorError::source_unavailable(format!(
                "quote endpoint returned {}",
                response.status()
            )));
        }

        let body: MetalsResponse = response
            .json()
            .await
            .map_err(|e| CalculatorError::source_unavailable(format!("bad quote body: {}", e)))?;

        self.extract_price(body)
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct PriceSourceAdapter {
    fetcher: Option<Arc<dyn QuoteFetcher>>,
    cache: Option<Arc<dyn RateCache>>,
    max_cache_age: Duration,
}

impl PriceSourceAdapter {
    /// Always answers with the hardcoded table
    pub fn fixed_only() -> Self {
        Self {
            fetcher: None,
            cache: None,
            max_cache_age: Duration::hours(24),
        }
    }

    pub fn new(
        fetcher: Arc<dyn QuoteFetcher>,
        cache: Arc<dyn RateCache>,
        max_cache_age: Duration,
    ) -> Self {
        Self {
            fetcher: Some(fetcher),
            cache: Some(cache),
            max_cache_age,
        }
    }

    pub fn from_config(
        config: &QuoteConfig,
        cache: Arc<dyn RateCache>,
    ) -> Result<Self> {
        match config.source {
            PriceSourceMode::Fixed => Ok(Self::fixed_only()),
            PriceSourceMode::Live => {
                let max_age = config
                    .cache_max_age()
                    .map_err(|e| CalculatorError::invalid_input(e.to_string()))?;
                let client = MetalsApiClient::from_config(config)?;
                Ok(Self::new(Arc::new(client), cache, max_age))
            }
        }
    }

    pub async fn resolve(&self) -> PricedRates {
        self.resolve_at(Utc::now()).await
    }

    /// Walk the ladder as of `now`
    pub async fn resolve_at(&self, now: DateTime<Utc>) -> PricedRates {
        let Some(fetcher) = &self.fetcher else {
            return PricedRates::fixed();
        };

        match self.fetch_live(fetcher.as_ref(), now).await {
            Ok(rates) => return rates,
            Err(e) => tracing::warn!("Live quote failed, falling back: {}", e),
        }

        if let Some(snapshot) = self.fresh_snapshot(now) {
            tracing::info!(
                age_minutes = snapshot.age(now).num_minutes(),
                "Using cached rates"
            );
            return PricedRates {
                table: snapshot.rates,
                provenance: Provenance::Cached,
                as_of: Some(snapshot.updated_at),
            };
        }

        tracing::warn!("No usable cached rates, using fixed table");
        PricedRates::fixed()
    }

    async fn fetch_live(&self, fetcher: &dyn QuoteFetcher, now: DateTime<Utc>) -> Result<PricedRates> {
        let ounce_price = fetcher.fetch_ounce_price().await?;
        let table = RateTable::from_ounce_price(ounce_price)
            .map_err(|e| CalculatorError::source_unavailable(e.to_string()))?;

        if let Some(cache) = &self.cache {
            let snapshot = RateSnapshot {
                rates: table.clone(),
                updated_at: now,
            };
            if let Err(e) = cache.save_snapshot(&snapshot) {
                tracing::warn!("Could not cache live rates: {}", e);
            }
        }

        tracing::info!(%ounce_price, "Live rates fetched");
        Ok(PricedRates {
            table,
            provenance: Provenance::Live,
            as_of: Some(now),
        })
    }

    fn fresh_snapshot(&self, now: DateTime<Utc>) -> Option<RateSnapshot> {
        let cache = self.cache.as_ref()?;
        let snapshot = match cache.load_snapshot() {
            Ok(snapshot) => snapshot?,
            Err(e) => {
                tracing::warn!("Rate cache unreadable: {}", e);
                return None;
            }
        };

        let age = snapshot.age(now);
        if age < Duration::zero() {
            tracing::warn!(
                updated_at = %snapshot.updated_at,
                "Cached rates are dated in the future, ignoring"
            );
            None
        } else if age < self.max_cache_age {
            Some(snapshot)
        } else {
            tracing::debug!(
                age_hours = snapshot.age(now).num_hours(),
                "Cached rates are stale"
            );
            None
        }
    }
}
