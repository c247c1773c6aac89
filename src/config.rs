//! Application configuration
//!
//! Loaded from defaults, then an optional TOML file, then `GOLD_*`
//! environment variables, then CLI overrides (highest priority).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default metals quote endpoint
pub const DEFAULT_QUOTE_URL: &str = "https://metals-api.com/api/latest";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid storage mode: {0}. Must be one of: local, remote")]
    InvalidStorage(String),

    #[error("Invalid price source: {0}. Must be one of: fixed, live")]
    InvalidPriceSource(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Remote storage requires {0}")]
    MissingRemoteSetting(&'static str),

    #[error("Configuration file error: {0}")]
    FileError(String),
}

// ============================================================================
// ENUMS
// ============================================================================

/// Where calculation history lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    Remote,
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "remote" | "firebase" | "firestore" => Ok(StorageMode::Remote),
            _ => Err(ConfigError::InvalidStorage(s.to_string())),
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Local => write!(f, "local"),
            StorageMode::Remote => write!(f, "remote"),
        }
    }
}

/// Where per-gram rates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceMode {
    Fixed,
    #[default]
    Live,
}

impl FromStr for PriceSourceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "static" => Ok(PriceSourceMode::Fixed),
            "live" => Ok(PriceSourceMode::Live),
            _ => Err(ConfigError::InvalidPriceSource(s.to_string())),
        }
    }
}

impl std::fmt::Display for PriceSourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSourceMode::Fixed => write!(f, "fixed"),
            PriceSourceMode::Live => write!(f, "live"),
        }
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub source: PriceSourceMode,
    pub api_url: String,
    pub api_key: Option<String>,
    /// Metal code quoted against
    pub base_currency: String,
    pub target_currency: String,
    pub timeout_secs: u64,
    pub cache_max_age_hours: i64,
    pub refresh_minutes: u64,
}

impl QuoteConfig {
    /// How often rates are re-resolved; must be positive and fit a `chrono::Duration`
    pub fn refresh_interval(&self) -> Result<chrono::Duration, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: "quote.refresh_minutes",
            value: self.refresh_minutes.to_string(),
        };
        let minutes = i64::try_from(self.refresh_minutes).map_err(|_| invalid())?;
        if minutes <= 0 {
            return Err(invalid());
        }
        chrono::Duration::try_minutes(minutes).ok_or_else(invalid)
    }

    /// Oldest cached snapshot still served as `cached`
    pub fn cache_max_age(&self) -> Result<chrono::Duration, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: "quote.cache_max_age_hours",
            value: self.cache_max_age_hours.to_string(),
        };
        if self.cache_max_age_hours <= 0 {
            return Err(invalid());
        }
        chrono::Duration::try_hours(self.cache_max_age_hours).ok_or_else(invalid)
    }
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            source: PriceSourceMode::Live,
            api_url: DEFAULT_QUOTE_URL.to_string(),
            api_key: None,
            base_currency: "XAU".to_string(),
            target_currency: "INR".to_string(),
            timeout_secs: 10,
            cache_max_age_hours: 24,
            refresh_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            api_key: None,
            collection: "calculations".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub storage: StorageMode,
    pub log_level: String,
    pub quote: QuoteConfig,
    pub remote: RemoteConfig,
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("gold-calculator.db"),
            storage: StorageMode::Local,
            log_level: "info".to_string(),
            quote: QuoteConfig::default(),
            remote: RemoteConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

/// CLI overrides, filled in by the binaries
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub storage: Option<StorageMode>,
    pub price_source: Option<PriceSourceMode>,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))
    }

    /// Overlay environment variables through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GOLD_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(storage) = lookup("GOLD_STORAGE") {
            self.storage = StorageMode::from_str(&storage)?;
        }
        if let Some(level) = lookup("GOLD_LOG_LEVEL") {
            self.log_level = level;
        }

        // Quote endpoint
        if let Some(source) = lookup("GOLD_PRICE_SOURCE") {
            self.quote.source = PriceSourceMode::from_str(&source)?;
        }
        if let Some(key) = lookup("GOLD_API_KEY") {
            self.quote.api_key = Some(key);
        }
        if let Some(url) = lookup("GOLD_API_URL") {
            self.quote.api_url = url;
        }
        if let Some(minutes) = lookup("GOLD_REFRESH_MINUTES") {
            self.quote.refresh_minutes = parse_number("GOLD_REFRESH_MINUTES", &minutes)?;
        }
        if let Some(hours) = lookup("GOLD_CACHE_MAX_AGE_HOURS") {
            self.quote.cache_max_age_hours = parse_number("GOLD_CACHE_MAX_AGE_HOURS", &hours)?;
        }

        // Remote document store
        if let Some(project) = lookup("GOLD_FIREBASE_PROJECT") {
            self.remote.project_id = Some(project);
        }
        if let Some(key) = lookup("GOLD_FIREBASE_API_KEY") {
            self.remote.api_key = Some(key);
        }
        if let Some(collection) = lookup("GOLD_FIREBASE_COLLECTION") {
            self.remote.collection = collection;
        }

        // Server
        if let Some(host) = lookup("GOLD_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("GOLD_SERVER_PORT") {
            self.server.port = parse_number("GOLD_SERVER_PORT", &port)?;
        }

        Ok(())
    }

    /// Merge with CLI arguments (CLI takes precedence)
    pub fn merge_with_cli(&mut self, cli: &CliOverrides) {
        if let Some(path) = &cli.database_path {
            self.database_path = path.clone();
        }
        if let Some(storage) = cli.storage {
            self.storage = storage;
        }
        if let Some(source) = cli.price_source {
            self.quote.source = source;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quote.refresh_interval()?;
        self.quote.cache_max_age()?;
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                name: "server.port",
                value: "0".to_string(),
            });
        }
        if self.storage == StorageMode::Remote {
            if self.remote.project_id.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingRemoteSetting("remote.project_id"));
            }
            if self.remote.api_key.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingRemoteSetting("remote.api_key"));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn refresh_interval(&self) -> Result<chrono::Duration, ConfigError> {
        self.quote.refresh_interval()
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &CliOverrides) -> Result<AppConfig, ConfigError> {
    let mut config = match &cli.config_file {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    config.merge_with_cli(cli);
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage, StorageMode::Local);
        assert_eq!(config.quote.source, PriceSourceMode::Live);
        assert_eq!(config.quote.base_currency, "XAU");
        assert_eq!(config.quote.target_currency, "INR");
        assert_eq!(config.quote.refresh_minutes, 30);
        assert_eq!(config.quote.cache_max_age_hours, 24);
        assert_eq!(config.remote.collection, "calculations");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_file() {
        let config = AppConfig::from_toml_str(
            r#"
            storage = "local"
            database_path = "/tmp/gold.db"

            [quote]
            source = "fixed"
            refresh_minutes = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/gold.db"));
        assert_eq!(config.quote.source, PriceSourceMode::Fixed);
        assert_eq!(config.quote.refresh_minutes, 5);
        // untouched fields keep defaults
        assert_eq!(config.quote.cache_max_age_hours, 24);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GOLD_STORAGE", "remote"),
            ("GOLD_FIREBASE_PROJECT", "gold-price-calculator"),
            ("GOLD_FIREBASE_API_KEY", "key-123"),
            ("GOLD_API_KEY", "metals-key"),
            ("GOLD_SERVER_PORT", "8081"),
        ]);

        let mut config = AppConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage, StorageMode::Remote);
        assert_eq!(config.quote.api_key.as_deref(), Some("metals-key"));
        assert_eq!(config.server.port, 8081);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|name| {
            (name == "GOLD_REFRESH_MINUTES").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let env: HashMap<&str, &str> =
            HashMap::from([("GOLD_CACHE_MAX_AGE_HOURS", "9223372036854775807")]);
        let mut config = AppConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "quote.cache_max_age_hours", .. })
        ));

        let mut config = AppConfig::default();
        config.quote.refresh_minutes = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "quote.refresh_minutes", .. })
        ));
        config.quote.refresh_minutes = i64::MAX as u64;
        assert!(config.validate().is_err());
        config.quote.refresh_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.quote.cache_max_age_hours = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = AppConfig::default();
        assert_eq!(config.refresh_interval().unwrap(), chrono::Duration::minutes(30));
        assert_eq!(config.quote.cache_max_age().unwrap(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_remote_requires_credentials() {
        let mut config = AppConfig::default();
        config.storage = StorageMode::Remote;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRemoteSetting("remote.project_id"))
        ));

        config.remote.project_id = Some("proj".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRemoteSetting("remote.api_key"))
        ));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let mut config = AppConfig::default();
        config.merge_with_cli(&CliOverrides {
            storage: Some(StorageMode::Remote),
            price_source: Some(PriceSourceMode::Fixed),
            log_level: Some("debug".to_string()),
            ..Default::default()
        });

        assert_eq!(config.storage, StorageMode::Remote);
        assert_eq!(config.quote.source, PriceSourceMode::Fixed);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(StorageMode::from_str("Firebase").unwrap(), StorageMode::Remote);
        assert!(StorageMode::from_str("s3").is_err());
        assert_eq!(PriceSourceMode::from_str("STATIC").unwrap(), PriceSourceMode::Fixed);
        assert!(PriceSourceMode::from_str("guess").is_err());
    }
}
