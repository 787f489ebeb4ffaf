//! Configuration types for campaign-dispatch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sender address used when none is configured
pub const DEFAULT_FROM_EMAIL: &str = "noreply@example.com";

/// Delivery API settings (credentials, sender identity, strict-provider pacing)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Base URL of the delivery API (default: "https://api.sendgrid.com")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: String,

    /// Sender address (default: "noreply@example.com")
    #[serde(default = "default_from_email")]
    pub from_email: String,

    /// Sender display name (default: "Campaign Mailer")
    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Destination domains that need gentler pacing
    ///
    /// Sub-domains match as well, so "outlook.com" covers "eu.outlook.com".
    #[serde(default = "default_strict_domains")]
    pub strict_domains: Vec<String>,

    /// Extra delay before each send to a strict domain (default: 1 second)
    #[serde(default = "default_strict_pre_send_delay", with = "duration_secs")]
    pub strict_pre_send_delay: Duration,

    /// Multiplier applied to the base retry delay for strict domains (default: 2.0)
    #[serde(default = "default_strict_backoff_multiplier")]
    pub strict_backoff_multiplier: f64,

    /// Client identification sent in the X-Mailer header
    #[serde(default = "default_mailer_name")]
    pub mailer_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            request_timeout: default_request_timeout(),
            strict_domains: default_strict_domains(),
            strict_pre_send_delay: default_strict_pre_send_delay(),
            strict_backoff_multiplier: default_strict_backoff_multiplier(),
            mailer_name: default_mailer_name(),
        }
    }
}

/// Dispatcher behaviour (worker pool size, pause polling, event buffering)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker pool size when a campaign does not set one (default: 5)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How often a paused run checks whether it may continue (default: 0.5 seconds)
    #[serde(default = "default_pause_poll_interval", with = "duration_secs")]
    pub pause_poll_interval: Duration,

    /// Minimum pause between submissions, applied to every campaign (default: 0)
    ///
    /// A campaign's own `batch_pause` wins when it is longer.
    #[serde(default, with = "duration_secs")]
    pub batch_pause: Duration,

    /// Capacity of the live event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            pause_poll_interval: default_pause_poll_interval(),
            batch_pause: Duration::ZERO,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Retry configuration for failed delivery attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per message when the campaign does not set a budget (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after every failure (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_secs")]
    pub base_delay: Duration,

    /// Upper bound for a single backoff sleep (default: 300 seconds)
    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./storage/campaigns.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory receiving one delivery log per run (default: "./storage/logs")
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// Main configuration for the dispatcher and its HTTP transport
///
/// Delivery and dispatch settings are flattened, so the serialized form keeps
/// them at the top level next to the `retry` and `persistence` tables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delivery API settings
    #[serde(flatten)]
    pub delivery: DeliveryConfig,

    /// Dispatcher settings
    #[serde(flatten)]
    pub dispatch: DispatchConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Storage locations
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Defaults overlaid with values from the process environment
    ///
    /// Recognised variables: `SENDGRID_API_KEY`, `SENDGRID_FROM_EMAIL`,
    /// `SENDGRID_FROM_NAME`, `SENDGRID_API_URL`, `MAX_WORKERS`, `MAX_RETRIES`,
    /// `RETRY_BASE_DELAY` (seconds), `BATCH_PAUSE` (seconds),
    /// `PAUSE_POLL_INTERVAL` (seconds), `DATABASE_PATH` and `LOGS_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("SENDGRID_API_KEY") {
            config.delivery.api_key = v;
        }
        if let Some(v) = lookup("SENDGRID_FROM_EMAIL") {
            config.delivery.from_email = v;
        }
        if let Some(v) = lookup("SENDGRID_FROM_NAME") {
            config.delivery.from_name = v;
        }
        if let Some(v) = lookup("SENDGRID_API_URL") {
            config.delivery.api_base_url = v;
        }
        if let Some(v) = lookup("MAX_WORKERS") {
            config.dispatch.max_workers = parse_env("MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            config.retry.max_attempts = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("RETRY_BASE_DELAY") {
            config.retry.base_delay = parse_env_secs("RETRY_BASE_DELAY", &v)?;
        }
        if let Some(v) = lookup("BATCH_PAUSE") {
            config.dispatch.batch_pause = parse_env_secs("BATCH_PAUSE", &v)?;
        }
        if let Some(v) = lookup("PAUSE_POLL_INTERVAL") {
            config.dispatch.pause_poll_interval = parse_env_secs("PAUSE_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            config.persistence.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOGS_DIR") {
            config.persistence.logs_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_workers == 0 {
            return Err(Error::Config {
                message: "max_workers must be at least 1".to_string(),
                key: Some("max_workers".to_string()),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "max_attempts must be at least 1".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }
        let multiplier = self.delivery.strict_backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "strict_backoff_multiplier must be a finite number >= 1, got {multiplier}"
                ),
                key: Some("strict_backoff_multiplier".to_string()),
            });
        }
        if url::Url::parse(&self.delivery.api_base_url).is_err() {
            return Err(Error::Config {
                message: format!("invalid API base URL '{}'", self.delivery.api_base_url),
                key: Some("api_base_url".to_string()),
            });
        }
        Ok(())
    }

    /// Non-fatal problems worth showing to an operator
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.delivery.api_key.is_empty() {
            warnings.push("SENDGRID_API_KEY is not configured; every send will fail".to_string());
        }
        if self.delivery.from_email == DEFAULT_FROM_EMAIL {
            warnings.push(format!(
                "sender address is the default '{DEFAULT_FROM_EMAIL}'"
            ));
        }
        warnings
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::Config {
        message: format!("{key} has invalid value '{value}'"),
        key: Some(key.to_string()),
    })
}

fn parse_env_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = parse_env(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| Error::Config {
        message: format!("{key} must be a non-negative number of seconds"),
        key: Some(key.to_string()),
    })
}

fn default_api_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_from_email() -> String {
    DEFAULT_FROM_EMAIL.to_string()
}

fn default_from_name() -> String {
    "Campaign Mailer".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_strict_domains() -> Vec<String> {
    vec![
        "hotmail.com".into(),
        "outlook.com".into(),
        "live.com".into(),
        "msn.com".into(),
        "yahoo.com".into(),
    ]
}

fn default_strict_pre_send_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_strict_backoff_multiplier() -> f64 {
    2.0
}

fn default_mailer_name() -> String {
    concat!("campaign-dispatch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_workers() -> usize {
    5
}

fn default_pause_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./storage/campaigns.db")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./storage/logs")
}

/// Duration serialization as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.dispatch.max_workers, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.dispatch.pause_poll_interval, Duration::from_millis(500));
        assert!(config.delivery.strict_domains.contains(&"hotmail.com".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.dispatch.max_workers, 5);
        assert_eq!(config.delivery.from_email, DEFAULT_FROM_EMAIL);
        assert_eq!(config.persistence.logs_dir, PathBuf::from("./storage/logs"));
    }

    #[test]
    fn durations_deserialize_from_fractional_seconds() {
        let config: Config = serde_json::from_str(
            r#"{"pause_poll_interval": 0.05, "retry": {"base_delay": 0.25}}"#,
        )
        .unwrap();
        assert_eq!(config.dispatch.pause_poll_interval, Duration::from_millis(50));
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("SENDGRID_API_KEY", "SG.key"),
            ("MAX_WORKERS", "8"),
            ("MAX_RETRIES", "4"),
            ("RETRY_BASE_DELAY", "0.5"),
            ("BATCH_PAUSE", "0.2"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.delivery.api_key, "SG.key");
        assert_eq!(config.dispatch.max_workers, 8);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.dispatch.batch_pause, Duration::from_millis(200));
    }

    #[test]
    fn invalid_environment_value_names_the_key() {
        let err = Config::from_lookup(|k| (k == "MAX_WORKERS").then(|| "lots".to_string()))
            .unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("MAX_WORKERS")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.dispatch.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unbounded_strict_backoff_multiplier_is_rejected() {
        for multiplier in [f64::INFINITY, f64::NAN, 0.5, 1e300] {
            let mut config = Config::default();
            config.delivery.strict_backoff_multiplier = multiplier;
            let valid = config.validate().is_ok();
            assert_eq!(valid, multiplier == 1e300, "multiplier {multiplier}");
        }
    }

    #[test]
    fn warnings_flag_missing_key_and_default_sender() {
        let config = Config::default();
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 2);

        let mut config = Config::default();
        config.delivery.api_key = "SG.key".to_string();
        config.delivery.from_email = "events@acme.test".to_string();
        assert!(config.warnings().is_empty());
    }
}
