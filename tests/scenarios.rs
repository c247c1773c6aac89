// End-to-end scenarios through the public API: adapter ladder, calculator,
// and the on-disk local store.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use gold_calculator::{
    open_calculator, AppConfig, CalculationEntry, Calculator, CalculatorError, History,
    HistoryStore, LocalStore, PriceSourceAdapter, Provenance, PurityTier, QuoteFetcher,
    RateCache, RateSnapshot, RateTable, HISTORY_CAP,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

struct OfflineFetcher;

#[async_trait]
impl QuoteFetcher for OfflineFetcher {
    async fn fetch_ounce_price(&self) -> Result<Decimal, CalculatorError> {
        Err(CalculatorError::source_unavailable("network down"))
    }
}

fn temp_store() -> (TempDir, Arc<LocalStore>) {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open(&dir.path().join("gold.db")).unwrap();
    (dir, Arc::new(store))
}

#[tokio::test]
async fn fixed_24k_ten_grams() {
    let (_dir, store) = temp_store();
    let mut calculator = Calculator::open(PriceSourceAdapter::fixed_only(), store).await;

    let outcome = calculator.calculate(PurityTier::Karat24, "10").await.unwrap();

    assert_eq!(outcome.breakdown.base, dec!(116152.40));
    assert_eq!(outcome.breakdown.tax, dec!(3484.572));
    assert_eq!(outcome.breakdown.fee, dec!(11615.24));
    assert_eq!(outcome.breakdown.total, dec!(131252.212));
    assert_eq!(outcome.breakdown.rounded().total, dec!(131252.21));
    assert_eq!(outcome.entry.provenance, Provenance::Fixed);
}

#[tokio::test]
async fn offline_uses_ten_hour_old_cache() {
    let (_dir, store) = temp_store();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
    store
        .save_snapshot(&RateSnapshot {
            rates: RateTable::fixed(),
            updated_at: now - Duration::hours(10),
        })
        .unwrap();

    let adapter = PriceSourceAdapter::new(Arc::new(OfflineFetcher), store.clone(), Duration::hours(24));
    let rates = adapter.resolve_at(now).await;
    let quote = rates.quote(PurityTier::Karat22).unwrap();

    assert_eq!(quote.rate, dec!(10647.30));
    assert_eq!(quote.provenance, Provenance::Cached);

    let (entry, breakdown) =
        CalculationEntry::compute(PurityTier::Karat22, dec!(5), quote.rate, quote.provenance, now)
            .unwrap();
    assert_eq!(breakdown.base, dec!(53236.50));
    assert_eq!(breakdown.total, dec!(60157.245));
    assert_eq!(breakdown.rounded().total, dec!(60157.25));
    assert_eq!(entry.provenance, Provenance::Cached);
}

#[tokio::test]
async fn offline_with_stale_cache_falls_back_to_fixed() {
    let (_dir, store) = temp_store();
    let now = Utc::now();
    store
        .save_snapshot(&RateSnapshot {
            rates: RateTable::from_ounce_price(dec!(250000)).unwrap(),
            updated_at: now - Duration::hours(25),
        })
        .unwrap();

    let adapter = PriceSourceAdapter::new(Arc::new(OfflineFetcher), store, Duration::hours(24));
    let rates = adapter.resolve_at(now).await;

    assert_eq!(rates.provenance, Provenance::Fixed);
    assert_eq!(rates.table, RateTable::fixed());
}

#[tokio::test]
async fn eleventh_calculation_evicts_the_first() {
    let (_dir, store) = temp_store();
    let mut calculator = Calculator::open(PriceSourceAdapter::fixed_only(), store.clone()).await;

    let mut ids = Vec::new();
    for grams in 1..=11 {
        let outcome = calculator
            .calculate(PurityTier::Karat18, &grams.to_string())
            .await
            .unwrap();
        ids.push(outcome.entry.id);
    }

    let history = calculator.history();
    assert_eq!(history.len(), HISTORY_CAP);
    assert!(history.find(&ids[0]).is_none());
    assert_eq!(history.get(0).unwrap().id, ids[10]);

    // What was persisted matches what is shown
    assert_eq!(&store.load().await.unwrap(), history);
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        database_path: dir.path().join("gold.db"),
        ..AppConfig::default()
    };

    let mut first = open_calculator(&config).await.unwrap();
    let outcome = first.calculate(PurityTier::Karat22, "3.5").await.unwrap();
    drop(first);

    let second = open_calculator(&config).await.unwrap();
    let history: &History = second.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history.get(0).unwrap(), &outcome.entry);
}
