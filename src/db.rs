use crate::error::{CalculatorError, Result};
use crate::history::{append_history, clear_history, CalculationEntry, History};
use crate::source::{RateCache, RateSnapshot};
use crate::store::HistoryStore;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Key holding the JSON-encoded history
pub const HISTORY_KEY: &str = "gold-history";

/// Key holding the JSON-encoded rate snapshot
pub const RATES_KEY: &str = "gold-rates";

/// Local key-value store on SQLite.
/// Values are JSON text; there is no schema versioning.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CalculatorError::persistence("local store lock poisoned"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn write_history(&self, history: &History) -> Result<()> {
        let json = serde_json::to_string(history)?;
        self.set(HISTORY_KEY, &json)
    }

    fn read_history(&self) -> Result<History> {
        match self.get(HISTORY_KEY)? {
            Some(json) => {
                let entries: Vec<CalculationEntry> = serde_json::from_str(&json)?;
                Ok(History::from_entries(entries))
            }
            None => Ok(History::new()),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL only matters for on-disk files; in-memory databases report "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

#[async_trait]
impl HistoryStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn load(&self) -> Result<History> {
        self.read_history()
    }

    async fn save(&self, history: &History, entry: &CalculationEntry) -> Result<History> {
        let updated = append_history(history, entry.clone());
        self.write_history(&updated)?;
        tracing::debug!(id = %entry.id, len = updated.len(), "History saved locally");
        Ok(updated)
    }

    async fn delete(&self, history: &History, id: &str) -> Result<History> {
        let updated = history.without(id);
        self.write_history(&updated)?;
        Ok(updated)
    }

    async fn clear(&self, _history: &History) -> Result<History> {
        self.remove(HISTORY_KEY)?;
        Ok(clear_history())
    }
}

impl RateCache for LocalStore {
    fn load_snapshot(&self) -> Result<Option<RateSnapshot>> {
        match self.get(RATES_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_snapshot(&self, snapshot: &RateSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.set(RATES_KEY, &json)
    }
}

/// Write history entries as CSV rows
pub fn export_csv<W: std::io::Write>(history: &History, writer: W) -> anyhow::Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for entry in history.entries() {
        wtr.serialize(CsvRow::from(entry))?;
    }
    wtr.flush()?;
    Ok(history.len())
}

#[derive(serde::Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    timestamp: String,
    tier: &'static str,
    grams: String,
    rate: String,
    base: String,
    tax: String,
    fee: String,
    total: String,
    provenance: &'static str,
}

impl<'a> From<&'a CalculationEntry> for CsvRow<'a> {
    fn from(entry: &'a CalculationEntry) -> Self {
        let shown = entry.breakdown().rounded();
        Self {
            id: &entry.id,
            timestamp: entry.timestamp.to_rfc3339(),
            tier: entry.tier.as_str(),
            grams: entry.grams.to_string(),
            rate: entry.rate.to_string(),
            base: shown.base.to_string(),
            tax: shown.tax.to_string(),
            fee: shown.fee.to_string(),
            total: shown.total.to_string(),
            provenance: entry.provenance.as_str(),
        }
    }
}
