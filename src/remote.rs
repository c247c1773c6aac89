//! Remote history store on Cloud Firestore (REST API).
//!
//! One document per calculation in a single collection. The document id is
//! the entry id; `timestamp` is stamped by the server with `REQUEST_TIME` and
//! drives the "most recent 10" query. Decimal fields travel as strings so
//! they come back exactly as written.

use crate::config::RemoteConfig;
use crate::error::{CalculatorError, Result};
use crate::history::{clear_history, CalculationEntry, History, HISTORY_CAP};
use crate::store::HistoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::str::FromStr;

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";

/// Page size used when listing documents for a bulk clear
const LIST_PAGE_SIZE: usize = 100;

pub struct FirestoreStore {
    client: reqwest::Client,
    api_root: String,
    project_id: String,
    api_key: String,
    collection: String,
}

impl FirestoreStore {
    pub fn new(project_id: &str, api_key: &str, collection: &str) -> Result<Self> {
        Self::with_api_root(FIRESTORE_API, project_id, api_key, collection, 10)
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let project_id = config
            .project_id
            .as_deref()
            .ok_or_else(|| CalculatorError::persistence("remote.project_id not configured"))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| CalculatorError::persistence("remote.api_key not configured"))?;

        Self::with_api_root(
            FIRESTORE_API,
            project_id,
            api_key,
            &config.collection,
            config.timeout_secs,
        )
    }

    fn with_api_root(
        api_root: &str,
        project_id: &str,
        api_key: &str,
        collection: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CalculatorError::persistence(format!("http client: {}", e)))?;

        Ok(Self::with_client(client, api_root, project_id, api_key, collection))
    }

    fn with_client(
        client: reqwest::Client,
        api_root: &str,
        project_id: &str,
        api_key: &str,
        collection: &str,
    ) -> Self {
        Self {
            client,
            api_root: api_root.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            api_key: api_key.to_string(),
            collection: collection.to_string(),
        }
    }

    /// `projects/{p}/databases/(default)/documents`
    fn documents_path(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path(), self.collection, id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path)
    }

    async fn insert(&self, entry: &CalculationEntry) -> Result<()> {
        let body = commit_body(&self.document_name(&entry.id), entry);
        let url = self.url(&format!(
            "projects/{}/databases/(default)/documents:commit",
            self.project_id
        ));

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(remote_error)?;

        check_status(response).await.map(|_| ())
    }

    async fn query_recent(&self) -> Result<History> {
        let url = self.url(&format!("{}:runQuery", self.documents_path()));
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "orderBy": [{
                    "field": { "fieldPath": "timestamp" },
                    "direction": "DESCENDING"
                }],
                "limit": HISTORY_CAP
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(remote_error)?;

        let rows: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(remote_error)?;

        let entries = parse_run_query(&rows)?;
        Ok(History::from_entries(entries))
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let url = self.url(&self.document_name(id));
        let response = self
            .client
            .delete(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(remote_error)?;

        check_status(response).await.map(|_| ())
    }

    /// Every document id in the collection, following page tokens
    async fn list_ids(&self) -> Result<Vec<String>> {
        let url = self.url(&format!("{}/{}", self.documents_path(), self.collection));
        let page_size = LIST_PAGE_SIZE.to_string();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("key", self.api_key.clone()),
                ("pageSize", page_size.clone()),
                ("mask.fieldPaths", "timestamp".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(remote_error)?;

            let page: Value = check_status(response)
                .await?
                .json()
                .await
                .map_err(remote_error)?;

            if let Some(documents) = page.get("documents").and_then(Value::as_array) {
                for doc in documents {
                    if let Some(id) = doc.get("name").and_then(Value::as_str).and_then(document_id) {
                        ids.push(id.to_string());
                    }
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if page_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl HistoryStore for FirestoreStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn load(&self) -> Result<History> {
        self.query_recent().await
    }

    async fn save(&self, _history: &History, entry: &CalculationEntry) -> Result<History> {
        self.insert(entry).await?;
        tracing::debug!(id = %entry.id, collection = %self.collection, "Calculation stored remotely");
        self.query_recent().await
    }

    async fn delete(&self, _history: &History, id: &str) -> Result<History> {
        self.delete_document(id).await?;
        self.query_recent().await
    }

    async fn clear(&self, _history: &History) -> Result<History> {
        let ids = self.list_ids().await?;
        for id in &ids {
            self.delete_document(id).await?;
        }
        tracing::info!(deleted = ids.len(), "Remote history cleared");
        Ok(clear_history())
    }
}

fn remote_error(err: reqwest::Error) -> CalculatorError {
    CalculatorError::persistence(format!("firestore: {}", err))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CalculatorError::persistence(format!(
        "firestore returned {}: {}",
        status,
        body.chars().take(200).collect::<String>()
    )))
}

// ============================================================================
// DOCUMENT ENCODING
// ============================================================================

fn string_value(s: impl Into<String>) -> Value {
    json!({ "stringValue": s.into() })
}

/// Firestore `fields` map for an entry, without the server timestamp
pub fn entry_fields(entry: &CalculationEntry) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("id".into(), string_value(entry.id.clone()));
    fields.insert(
        "createdAt".into(),
        json!({ "timestampValue": entry.timestamp.to_rfc3339() }),
    );
    fields.insert("goldType".into(), string_value(entry.tier.as_str()));
    fields.insert("grams".into(), string_value(entry.grams.to_string()));
    fields.insert("rate".into(), string_value(entry.rate.to_string()));
    fields.insert("base".into(), string_value(entry.base.to_string()));
    fields.insert("tax".into(), string_value(entry.tax.to_string()));
    fields.insert("fee".into(), string_value(entry.fee.to_string()));
    fields.insert("total".into(), string_value(entry.total.to_string()));
    fields.insert("provenance".into(), string_value(entry.provenance.as_str()));
    fields
}

/// Body for `documents:commit`: create the document and stamp `timestamp`
pub fn commit_body(document_name: &str, entry: &CalculationEntry) -> Value {
    json!({
        "writes": [{
            "update": {
                "name": document_name,
                "fields": Value::Object(entry_fields(entry)),
            },
            "updateTransforms": [{
                "fieldPath": "timestamp",
                "setToServerValue": "REQUEST_TIME"
            }],
            "currentDocument": { "exists": false }
        }]
    })
}

fn document_id(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|id| !id.is_empty())
}

fn field<'a>(fields: &'a Value, key: &str) -> Result<&'a Value> {
    fields
        .get(key)
        .ok_or_else(|| CalculatorError::persistence(format!("document missing field '{}'", key)))
}

fn field_str<'a>(fields: &'a Value, key: &str) -> Result<&'a str> {
    let value = field(fields, key)?;
    value
        .get("stringValue")
        .and_then(Value::as_str)
        .ok_or_else(|| CalculatorError::persistence(format!("field '{}' is not a string", key)))
}

fn field_decimal(fields: &Value, key: &str) -> Result<Decimal> {
    let value = field(fields, key)?;
    if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        return Decimal::from_str(s)
            .map_err(|e| CalculatorError::persistence(format!("field '{}': {}", key, e)));
    }
    // documents written by older clients store plain numbers
    if let Some(n) = value.get("doubleValue").and_then(Value::as_f64) {
        return Decimal::try_from(n)
            .map_err(|e| CalculatorError::persistence(format!("field '{}': {}", key, e)));
    }
    if let Some(n) = value.get("integerValue").and_then(Value::as_str) {
        return Decimal::from_str(n)
            .map_err(|e| CalculatorError::persistence(format!("field '{}': {}", key, e)));
    }
    Err(CalculatorError::persistence(format!("field '{}' is not numeric", key)))
}

fn field_timestamp(fields: &Value, key: &str) -> Option<DateTime<Utc>> {
    fields
        .get(key)?
        .get("timestampValue")?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode one Firestore document into an entry
pub fn decode_document(doc: &Value) -> Result<CalculationEntry> {
    let fields = doc
        .get("fields")
        .ok_or_else(|| CalculatorError::persistence("document has no fields"))?;

    let id = match field_str(fields, "id") {
        Ok(id) => id.to_string(),
        Err(_) => doc
            .get("name")
            .and_then(Value::as_str)
            .and_then(document_id)
            .map(str::to_string)
            .ok_or_else(|| CalculatorError::persistence("document has no id"))?,
    };

    let timestamp = field_timestamp(fields, "createdAt")
        .or_else(|| field_timestamp(fields, "timestamp"))
        .ok_or_else(|| CalculatorError::persistence(format!("document {} has no timestamp", id)))?;

    Ok(CalculationEntry {
        tier: field_str(fields, "goldType")?.parse()?,
        grams: field_decimal(fields, "grams")?,
        rate: field_decimal(fields, "rate")?,
        base: field_decimal(fields, "base")?,
        tax: field_decimal(fields, "tax")?,
        fee: field_decimal(fields, "fee")?,
        total: field_decimal(fields, "total")?,
        provenance: field_str(fields, "provenance")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(crate::history::Provenance::Fixed),
        id,
        timestamp,
    })
}

/// Decode a `:runQuery` response (array of `{document?, readTime}` rows)
pub fn parse_run_query(rows: &Value) -> Result<Vec<CalculationEntry>> {
    let rows = rows
        .as_array()
        .ok_or_else(|| CalculatorError::persistence("runQuery response is not an array"))?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(doc) = row.get("document") else {
            continue;
        };
        match decode_document(doc) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping unreadable remote document: {}", e),
        }
    }
    Ok(entries)
}
