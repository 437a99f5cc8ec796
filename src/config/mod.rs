//! Configuration loading for the fieldwatch monitoring core.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `FIELDWATCH_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoKey;
use crate::health::ReconnectPolicy;
use crate::validation::AnomalySettings;

const ENV_PREFIX: &str = "FIELDWATCH_";

/// Application configuration derived from `FIELDWATCH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Poll loop and health evaluation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonitorConfig {
    /// Age after which a connection or reading is considered stale (default: 60000)
    ///
    /// Environment variable: `FIELDWATCH_STALENESS_THRESHOLD_MS`
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    /// Upper bound for a single poll of one connection (default: 10000)
    ///
    /// Environment variable: `FIELDWATCH_POLL_TIMEOUT_MS`
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// How often the supervisor reconciles running poll loops with the store (default: 30)
    ///
    /// Environment variable: `FIELDWATCH_CONNECTION_REFRESH_SECONDS`
    #[serde(default = "default_connection_refresh_seconds")]
    pub connection_refresh_seconds: u64,

    /// Fraction of the poll interval used as random start offset (default: 0.2)
    ///
    /// Environment variable: `FIELDWATCH_POLL_START_JITTER_PCT`
    #[serde(default = "default_poll_start_jitter_pct")]
    pub poll_start_jitter_pct: f64,

    /// Capacity of the alarm notification channel (default: 256)
    ///
    /// Environment variable: `FIELDWATCH_NOTIFICATION_CHANNEL_CAPACITY`
    #[serde(default = "default_notification_channel_capacity")]
    pub notification_channel_capacity: usize,

    /// First delay after a failed poll (default: 1000)
    ///
    /// Environment variable: `FIELDWATCH_RECONNECT_INITIAL_BACKOFF_MS`
    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,

    /// Longest delay between failed polls (default: 60000)
    ///
    /// Environment variable: `FIELDWATCH_RECONNECT_MAX_BACKOFF_MS`
    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,

    /// Growth factor applied per consecutive failure (default: 2.0)
    ///
    /// Environment variable: `FIELDWATCH_RECONNECT_BACKOFF_MULTIPLIER`
    #[serde(default = "default_reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: f64,

    /// Consecutive failures after which a poll loop gives up; 0 never gives up (default: 0)
    ///
    /// Environment variable: `FIELDWATCH_RECONNECT_MAX_ATTEMPTS`
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// Consecutive failures that open the circuit breaker (default: 5)
    ///
    /// Environment variable: `FIELDWATCH_BREAKER_FAILURE_THRESHOLD`
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// How long an open breaker suspends polling before a trial poll (default: 300)
    ///
    /// Environment variable: `FIELDWATCH_BREAKER_OPEN_SECONDS`
    #[serde(default = "default_breaker_open_seconds")]
    pub breaker_open_seconds: u64,

    /// Z-score above which a numeric sample is flagged as an anomaly; 0 disables (default: 3.0)
    ///
    /// Environment variable: `FIELDWATCH_ANOMALY_STD_DEV_THRESHOLD`
    #[serde(default = "default_anomaly_std_dev_threshold")]
    pub anomaly_std_dev_threshold: f64,

    /// Samples a tag needs before anomaly checks apply (default: 100)
    ///
    /// Environment variable: `FIELDWATCH_ANOMALY_MIN_SAMPLES`
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,

    /// Rolling window of samples kept per tag (default: 1000)
    ///
    /// Environment variable: `FIELDWATCH_ANOMALY_WINDOW`
    #[serde(default = "default_anomaly_window")]
    pub anomaly_window: usize,
}

/// Reading retention parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetentionConfig {
    /// Readings older than this many days are deleted (default: 90)
    ///
    /// Environment variable: `FIELDWATCH_READING_RETENTION_DAYS`
    #[serde(default = "default_reading_retention_days")]
    pub reading_retention_days: u32,

    /// Interval between retention sweeps (default: 3600)
    ///
    /// Environment variable: `FIELDWATCH_RETENTION_SWEEP_INTERVAL_SECONDS`
    #[serde(default = "default_retention_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            monitor: MonitorConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: default_staleness_threshold_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            connection_refresh_seconds: default_connection_refresh_seconds(),
            poll_start_jitter_pct: default_poll_start_jitter_pct(),
            notification_channel_capacity: default_notification_channel_capacity(),
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
            reconnect_backoff_multiplier: default_reconnect_backoff_multiplier(),
            reconnect_max_attempts: 0,
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_seconds: default_breaker_open_seconds(),
            anomaly_std_dev_threshold: default_anomaly_std_dev_threshold(),
            anomaly_min_samples: default_anomaly_min_samples(),
            anomaly_window: default_anomaly_window(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            reading_retention_days: default_reading_retention_days(),
            sweep_interval_seconds: default_retention_sweep_interval_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if let Some(redacted) = redact_url_password(&config.database_url) {
            config.database_url = redacted;
        }
        serde_json::to_string_pretty(&config)
    }

    /// Returns the credential encryption key, if one is configured.
    pub fn crypto_key(&self) -> Result<CryptoKey, ConfigError> {
        let bytes = self.crypto_key.clone().ok_or(ConfigError::MissingCryptoKey)?;
        let length = bytes.len();
        CryptoKey::new(bytes).map_err(|_| ConfigError::InvalidCryptoKeyLength { length })
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.monitor.validate()?;
        self.retention.validate()?;

        Ok(())
    }
}

impl MonitorConfig {
    /// Validate poll loop bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_threshold_ms == 0 {
            return Err(ConfigError::InvalidStalenessThreshold {
                value: self.staleness_threshold_ms,
            });
        }

        if self.poll_timeout_ms < 100 || self.poll_timeout_ms > 300_000 {
            return Err(ConfigError::InvalidPollTimeout {
                value: self.poll_timeout_ms,
            });
        }

        if self.connection_refresh_seconds < 1 || self.connection_refresh_seconds > 3600 {
            return Err(ConfigError::InvalidConnectionRefresh {
                value: self.connection_refresh_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.poll_start_jitter_pct) {
            return Err(ConfigError::InvalidPollJitter {
                value: self.poll_start_jitter_pct,
            });
        }

        if self.notification_channel_capacity == 0 {
            return Err(ConfigError::InvalidNotificationCapacity);
        }

        if self.reconnect_initial_backoff_ms == 0
            || self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms
        {
            return Err(ConfigError::InvalidReconnectBackoff {
                initial: self.reconnect_initial_backoff_ms,
                max: self.reconnect_max_backoff_ms,
            });
        }

        if !(1.0..=10.0).contains(&self.reconnect_backoff_multiplier) {
            return Err(ConfigError::InvalidBackoffMultiplier {
                value: self.reconnect_backoff_multiplier,
            });
        }

        if self.breaker_failure_threshold == 0 || self.breaker_open_seconds == 0 {
            return Err(ConfigError::InvalidBreaker {
                threshold: self.breaker_failure_threshold,
                open_seconds: self.breaker_open_seconds,
            });
        }

        if !self.anomaly_std_dev_threshold.is_finite() || self.anomaly_std_dev_threshold < 0.0 {
            return Err(ConfigError::InvalidAnomalyThreshold {
                value: self.anomaly_std_dev_threshold,
            });
        }

        if self.anomaly_min_samples < 2 || self.anomaly_window < self.anomaly_min_samples {
            return Err(ConfigError::InvalidAnomalyWindow {
                min_samples: self.anomaly_min_samples,
                window: self.anomaly_window,
            });
        }

        Ok(())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn connection_refresh(&self) -> Duration {
        Duration::from_secs(self.connection_refresh_seconds)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            multiplier: self.reconnect_backoff_multiplier,
            max_attempts: self.reconnect_max_attempts,
            breaker_threshold: self.breaker_failure_threshold,
            breaker_open_for: Duration::from_secs(self.breaker_open_seconds),
        }
    }

    pub fn anomaly_settings(&self) -> AnomalySettings {
        AnomalySettings {
            std_dev_threshold: self.anomaly_std_dev_threshold,
            min_samples: self.anomaly_min_samples,
            window: self.anomaly_window,
        }
    }
}

impl RetentionConfig {
    /// Validate retention bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reading_retention_days == 0 {
            return Err(ConfigError::InvalidRetentionDays {
                value: self.reading_retention_days,
            });
        }

        if self.sweep_interval_seconds < 60 {
            return Err(ConfigError::InvalidSweepInterval {
                value: self.sweep_interval_seconds,
            });
        }

        Ok(())
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.reading_retention_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn redact_url_password(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;
    parsed.password()?;
    parsed.set_password(Some("REDACTED")).ok()?;
    Some(parsed.to_string())
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://fieldwatch.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_staleness_threshold_ms() -> u64 {
    60_000
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_connection_refresh_seconds() -> u64 {
    30
}

fn default_poll_start_jitter_pct() -> f64 {
    0.2
}

fn default_notification_channel_capacity() -> usize {
    256
}

fn default_reconnect_initial_backoff_ms() -> u64 {
    1000
}

fn default_reconnect_max_backoff_ms() -> u64 {
    60_000
}

fn default_reconnect_backoff_multiplier() -> f64 {
    2.0
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_open_seconds() -> u64 {
    300
}

fn default_anomaly_std_dev_threshold() -> f64 {
    3.0
}

fn default_anomaly_min_samples() -> usize {
    100
}

fn default_anomaly_window() -> usize {
    1000
}

fn default_reading_retention_days() -> u32 {
    90
}

fn default_retention_sweep_interval_seconds() -> u64 {
    3600
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("crypto key is missing; set FIELDWATCH_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("staleness threshold must be positive, got {value}ms")]
    InvalidStalenessThreshold { value: u64 },
    #[error("poll timeout must be between 100 and 300000 ms, got {value}")]
    InvalidPollTimeout { value: u64 },
    #[error("connection refresh interval must be between 1 and 3600 seconds, got {value}")]
    InvalidConnectionRefresh { value: u64 },
    #[error("poll start jitter must be between 0.0 and 1.0, got {value}")]
    InvalidPollJitter { value: f64 },
    #[error("notification channel capacity must be positive")]
    InvalidNotificationCapacity,
    #[error("reconnect backoff must satisfy 0 < initial ({initial}ms) <= max ({max}ms)")]
    InvalidReconnectBackoff { initial: u64, max: u64 },
    #[error("reconnect backoff multiplier must be between 1.0 and 10.0, got {value}")]
    InvalidBackoffMultiplier { value: f64 },
    #[error("breaker threshold ({threshold}) and open period ({open_seconds}s) must be positive")]
    InvalidBreaker { threshold: u32, open_seconds: u64 },
    #[error("anomaly threshold must be a non-negative number, got {value}")]
    InvalidAnomalyThreshold { value: f64 },
    #[error("anomaly window ({window}) must hold at least min samples ({min_samples}), which must be >= 2")]
    InvalidAnomalyWindow { min_samples: usize, window: usize },
    #[error("reading retention must be at least one day, got {value}")]
    InvalidRetentionDays { value: u32 },
    #[error("retention sweep interval must be at least 60 seconds, got {value}")]
    InvalidSweepInterval { value: u64 },
}

/// Loads configuration using layered `.env` files and `FIELDWATCH_*` env vars.
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

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`,
    /// then the process environment, and validates the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = parse_or(
            &mut layered,
            "DB_MAX_CONNECTIONS",
            default_db_max_connections,
        )?;
        let db_acquire_timeout_ms = parse_or(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        )?;

        let crypto_key = match layered.remove("CRYPTO_KEY").filter(|v| !v.is_empty()) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let monitor = MonitorConfig {
            staleness_threshold_ms: parse_or(
                &mut layered,
                "STALENESS_THRESHOLD_MS",
                default_staleness_threshold_ms,
            )?,
            poll_timeout_ms: parse_or(&mut layered, "POLL_TIMEOUT_MS", default_poll_timeout_ms)?,
            connection_refresh_seconds: parse_or(
                &mut layered,
                "CONNECTION_REFRESH_SECONDS",
                default_connection_refresh_seconds,
            )?,
            poll_start_jitter_pct: parse_or(
                &mut layered,
                "POLL_START_JITTER_PCT",
                default_poll_start_jitter_pct,
            )?,
            notification_channel_capacity: parse_or(
                &mut layered,
                "NOTIFICATION_CHANNEL_CAPACITY",
                default_notification_channel_capacity,
            )?,
            reconnect_initial_backoff_ms: parse_or(
                &mut layered,
                "RECONNECT_INITIAL_BACKOFF_MS",
                default_reconnect_initial_backoff_ms,
            )?,
            reconnect_max_backoff_ms: parse_or(
                &mut layered,
                "RECONNECT_MAX_BACKOFF_MS",
                default_reconnect_max_backoff_ms,
            )?,
            reconnect_backoff_multiplier: parse_or(
                &mut layered,
                "RECONNECT_BACKOFF_MULTIPLIER",
                default_reconnect_backoff_multiplier,
            )?,
            reconnect_max_attempts: parse_or(&mut layered, "RECONNECT_MAX_ATTEMPTS", || 0)?,
            breaker_failure_threshold: parse_or(
                &mut layered,
                "BREAKER_FAILURE_THRESHOLD",
                default_breaker_failure_threshold,
            )?,
            breaker_open_seconds: parse_or(
                &mut layered,
                "BREAKER_OPEN_SECONDS",
                default_breaker_open_seconds,
            )?,
            anomaly_std_dev_threshold: parse_or(
                &mut layered,
                "ANOMALY_STD_DEV_THRESHOLD",
                default_anomaly_std_dev_threshold,
            )?,
            anomaly_min_samples: parse_or(
                &mut layered,
                "ANOMALY_MIN_SAMPLES",
                default_anomaly_min_samples,
            )?,
            anomaly_window: parse_or(&mut layered, "ANOMALY_WINDOW", default_anomaly_window)?,
        };

        let retention = RetentionConfig {
            reading_retention_days: parse_or(
                &mut layered,
                "READING_RETENTION_DAYS",
                default_reading_retention_days,
            )?,
            sweep_interval_seconds: parse_or(
                &mut layered,
                "RETENTION_SWEEP_INTERVAL_SECONDS",
                default_retention_sweep_interval_seconds,
            )?,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            monitor,
            retention,
        };

        config.validate()?;

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
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
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
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

/// Parses a layered value, falling back to `default` when unset or empty.
fn parse_or<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default()),
    }
}
