//! Configuration loading for the CalDAV sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CALSYNC_`, producing a typed [`AppConfig`]. Configuration errors are
//! fatal at startup: the process refuses to run with a missing encryption
//! key or Google client credentials.

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, CryptoKey};

/// Application configuration derived from `CALSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub profile: String,
    pub log_level: String,
    pub log_format: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    /// 32-byte URL-safe base64 process key; never logged.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub google: GoogleConfig,
    pub caldav: CalDavConfig,
    pub sync: SyncConfig,
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(skip_serializing)]
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub token_url: String,
    pub api_base_url: String,
    pub rate_limit_delay_ms: u64,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub max_results_per_request: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalDavConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on sync runs in flight across all mappings.
    pub max_concurrent_runs: usize,
    /// Delay before the first fire of a freshly scheduled job.
    pub startup_delay_secs: u64,
    /// Window within which a fire missed while the process was down still
    /// runs on startup; older misses are skipped.
    pub misfire_grace_secs: u64,
    /// How long shutdown waits for in-flight runs before cancelling them.
    pub shutdown_grace_secs: u64,
    pub sync_log_retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    pub max_retries: i32,
    pub retry_delays_secs: Vec<i64>,
    pub include_event_details: bool,
    pub retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            database_url: default_database_url(),
            db_max_connections: 10,
            db_acquire_timeout_ms: 5000,
            encryption_key: None,
            google: GoogleConfig::default(),
            caldav: CalDavConfig::default(),
            sync: SyncConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            rate_limit_delay_ms: 100,
            max_retries: 3,
            request_timeout_secs: 30,
            max_results_per_request: 2500,
        }
    }
}

impl Default for CalDavConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 5,
            startup_delay_secs: 30,
            misfire_grace_secs: 300,
            shutdown_grace_secs: 30,
            sync_log_retention_days: 30,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delays_secs: vec![30, 300, 1800],
            include_event_details: true,
            retention_days: 7,
        }
    }
}

impl AppConfig {
    /// Decode the configured process key.
    pub fn crypto_key(&self) -> Result<CryptoKey, ConfigError> {
        let encoded = self
            .encryption_key
            .as_deref()
            .ok_or(ConfigError::MissingEncryptionKey)?;
        CryptoKey::from_base64(encoded).map_err(ConfigError::InvalidEncryptionKey)
    }

    /// Startup validation. Fatal outside the `test` profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profile == "test" {
            return Ok(());
        }
        self.crypto_key()?;
        if self
            .google
            .client_id
            .as_deref()
            .is_none_or(|v| v.is_empty())
        {
            return Err(ConfigError::MissingGoogleCredentials("client id"));
        }
        if self
            .google
            .client_secret
            .as_deref()
            .is_none_or(|v| v.is_empty())
        {
            return Err(ConfigError::MissingGoogleCredentials("client secret"));
        }
        Ok(())
    }

    /// Returns a redacted JSON representation; secret fields are skipped at
    /// the serde level.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_database_url() -> String {
    "sqlite://caldav_sync.db?mode=rwc".to_string()
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("encryption key is required (CALSYNC_ENCRYPTION_KEY)")]
    MissingEncryptionKey,
    #[error("encryption key is invalid: {0}")]
    InvalidEncryptionKey(#[from] CryptoError),
    #[error("google {0} is required (CALSYNC_GOOGLE_CLIENT_ID / CALSYNC_GOOGLE_CLIENT_SECRET)")]
    MissingGoogleCredentials(&'static str),
}

/// Loads configuration using layered `.env` files and `CALSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration: `.env` layers first, process environment wins.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("CALSYNC_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut config = AppConfig {
            profile: take(&mut layered, "PROFILE").unwrap_or(profile_hint),
            ..AppConfig::default()
        };

        if let Some(v) = take(&mut layered, "LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = take(&mut layered, "LOG_FORMAT") {
            config.log_format = v;
        }
        if let Some(v) = take(&mut layered, "DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = take_parsed(&mut layered, "DB_MAX_CONNECTIONS") {
            config.db_max_connections = v;
        }
        if let Some(v) = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS") {
            config.db_acquire_timeout_ms = v;
        }
        config.encryption_key = take(&mut layered, "ENCRYPTION_KEY");

        config.google.client_id = take(&mut layered, "GOOGLE_CLIENT_ID");
        config.google.client_secret = take(&mut layered, "GOOGLE_CLIENT_SECRET");
        if let Some(v) = take(&mut layered, "GOOGLE_TOKEN_URL") {
            config.google.token_url = v;
        }
        if let Some(v) = take(&mut layered, "GOOGLE_API_BASE_URL") {
            config.google.api_base_url = v;
        }
        if let Some(v) = take_parsed(&mut layered, "GOOGLE_RATE_LIMIT_DELAY_MS") {
            config.google.rate_limit_delay_ms = v;
        }
        if let Some(v) = take_parsed(&mut layered, "GOOGLE_MAX_RETRIES") {
            config.google.max_retries = v;
        }
        if let Some(v) = take_parsed(&mut layered, "GOOGLE_REQUEST_TIMEOUT_SECS") {
            config.google.request_timeout_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "GOOGLE_MAX_RESULTS") {
            config.google.max_results_per_request = v;
        }

        if let Some(v) = take_parsed(&mut layered, "CALDAV_CONNECT_TIMEOUT_SECS") {
            config.caldav.connect_timeout_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "CALDAV_READ_TIMEOUT_SECS") {
            config.caldav.read_timeout_secs = v;
        }

        if let Some(v) = take_parsed(&mut layered, "MAX_CONCURRENT_RUNS") {
            config.sync.max_concurrent_runs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_STARTUP_DELAY_SECS") {
            config.sync.startup_delay_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "MISFIRE_GRACE_SECS") {
            config.sync.misfire_grace_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SHUTDOWN_GRACE_SECS") {
            config.sync.shutdown_grace_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SYNC_LOG_RETENTION_DAYS") {
            config.sync.sync_log_retention_days = v;
        }

        if let Some(v) = take_parsed(&mut layered, "WEBHOOK_TIMEOUT_SECS") {
            config.webhooks.timeout_secs = v;
        }
        if let Some(v) = take_parsed(&mut layered, "WEBHOOK_MAX_RETRIES") {
            config.webhooks.max_retries = v;
        }
        if let Some(v) = take(&mut layered, "WEBHOOK_RETRY_DELAYS_SECS") {
            let delays: Vec<i64> = v
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect();
            if !delays.is_empty() {
                config.webhooks.retry_delays_secs = delays;
            }
        }
        if let Some(v) = take_parsed(&mut layered, "WEBHOOK_INCLUDE_EVENT_DETAILS") {
            config.webhooks.include_event_details = v;
        }
        if let Some(v) = take_parsed(&mut layered, "WEBHOOK_RETENTION_DAYS") {
            config.webhooks.retention_days = v;
        }

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("CALSYNC_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("CALSYNC_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values.remove(key).filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take(values, key).and_then(|v| v.parse().ok())
}
