// History persistence seam
//
// Every operation takes the caller's current History and returns the
// authoritative one after the write. On error the caller keeps its own copy.

use crate::config::{AppConfig, StorageMode};
use crate::db::LocalStore;
use crate::error::Result;
use crate::history::{CalculationEntry, History};
use crate::remote::FirestoreStore;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Short label for logs and status lines
    fn name(&self) -> &'static str;

    async fn load(&self) -> Result<History>;

    async fn save(&self, history: &History, entry: &CalculationEntry) -> Result<History>;

    async fn delete(&self, history: &History, id: &str) -> Result<History>;

    async fn clear(&self, history: &History) -> Result<History>;
}

/// Open the local store, which always exists because it also holds the rate
/// cache, and pick the history store the config asks for.
pub fn open_stores(config: &AppConfig) -> anyhow::Result<(Arc<LocalStore>, Arc<dyn HistoryStore>)> {
    let local = Arc::new(LocalStore::open(&config.database_path)?);

    let history: Arc<dyn HistoryStore> = match config.storage {
        StorageMode::Local => local.clone(),
        StorageMode::Remote => Arc::new(FirestoreStore::from_config(&config.remote)?),
    };

    tracing::info!(
        storage = %config.storage,
        store = history.name(),
        db = %config.database_path.display(),
        "History store ready"
    );

    Ok((local, history))
}
