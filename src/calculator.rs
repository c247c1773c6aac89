// 🧮 Calculator - in-memory state + degradation rules
//
// Owns the current rates and history. Every mutation goes through the
// store first; if the store fails the in-memory history stays as it was.

use crate::error::{CalculatorError, Result};
use crate::history::{CalculationEntry, History};
use crate::pricing::{parse_grams, Breakdown, PurityTier};
use crate::source::{PriceSourceAdapter, PricedRates};
use crate::store::HistoryStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Result of one calculate action
#[derive(Debug, Clone, Serialize)]
pub struct CalculationOutcome {
    pub entry: CalculationEntry,
    /// Full precision
    pub breakdown: Breakdown,
    /// Set when the entry could not be saved to history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct Calculator {
    adapter: PriceSourceAdapter,
    store: Arc<dyn HistoryStore>,
    rates: PricedRates,
    history: History,
    last_refresh: Option<DateTime<Utc>>,
    warnings: Vec<String>,
}

impl Calculator {
    /// Load history and resolve rates. Never fails; problems become warnings.
    pub async fn open(adapter: PriceSourceAdapter, store: Arc<dyn HistoryStore>) -> Self {
        let mut calculator = Self {
            adapter,
            store,
            rates: PricedRates::fixed(),
            history: History::new(),
            last_refresh: None,
            warnings: Vec::new(),
        };

        match calculator.store.load().await {
            Ok(history) => calculator.history = history,
            Err(e) => {
                tracing::warn!(store = calculator.store.name(), "Could not load history: {}", e);
                calculator
                    .warnings
                    .push(format!("History unavailable ({}); starting empty", e));
            }
        }

        calculator.refresh_rates().await;
        calculator
    }

    pub fn rates(&self) -> &PricedRates {
        &self.rates
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// Drain warnings collected outside of a user action (e.g. at startup)
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub async fn refresh_rates(&mut self) -> &PricedRates {
        let rates = self.adapter.resolve().await;
        tracing::info!(provenance = %rates.provenance, "Rates refreshed");
        self.rates = rates;
        self.last_refresh = Some(Utc::now());
        &self.rates
    }

    pub fn refresh_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_refresh {
            Some(last) => now - last >= interval,
            None => true,
        }
    }

    /// Price `grams_input` of `tier` gold and record it.
    pub async fn calculate(&mut self, tier: PurityTier, grams_input: &str) -> Result<CalculationOutcome> {
        let grams = parse_grams(grams_input)?;
        let quote = self.rates.quote(tier).ok_or_else(|| {
            CalculatorError::invalid_input(format!("no rate available for {}", tier))
        })?;

        let (entry, breakdown) =
            CalculationEntry::compute(tier, grams, quote.rate, quote.provenance, Utc::now())?;

        let warning = match self.store.save(&self.history, &entry).await {
            Ok(history) => {
                self.history = history;
                None
            }
            Err(e) => {
                tracing::warn!(id = %entry.id, "History not saved: {}", e);
                Some(format!("Calculated, but history was not saved: {}", e))
            }
        };

        tracing::info!(
            tier = %tier,
            grams = %grams,
            total = %breakdown.rounded().total,
            provenance = %quote.provenance,
            "Calculation complete"
        );

        Ok(CalculationOutcome {
            entry,
            breakdown,
            warning,
        })
    }

    pub async fn delete_entry(&mut self, id: &str) -> Result<()> {
        let history = self.store.delete(&self.history, id).await?;
        self.history = history;
        Ok(())
    }

    pub async fn clear_history(&mut self) -> Result<()> {
        let history = self.store.clear(&self.history).await?;
        self.history = history;
        Ok(())
    }
}
