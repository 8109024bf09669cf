//! Configuration for the station uplink service.
//!
//! Delivery settings are loaded from environment variables once at startup
//! and never mutated afterwards; the loaded [`DeliveryConfig`] is shared
//! read-only between tasks. The station credential is the only required
//! setting; everything else falls back to a sensible default.

use std::env;
use std::time::Duration;

use crate::units::UnitSystem;

/// Default report endpoint
const DEFAULT_SERVER_URL: &str = "http://www.temperatur.nu/rapportera.php";

/// Default minimum spacing between deliveries, in seconds
const DEFAULT_POST_INTERVAL_SECS: u64 = 600;

/// Default cap on records retained when the queue backs up
const DEFAULT_MAX_BACKLOG: usize = 1000;

/// Default per-request timeout, in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default delivery attempts per record
const DEFAULT_MAX_TRIES: u32 = 3;

/// Default wait between attempts, in seconds
const DEFAULT_RETRY_WAIT_SECS: u64 = 5;

/// Configuration for the delivery pipeline.
///
/// All settings can be configured via environment variables:
/// - `UPLINK_HASH`: station credential (required)
/// - `UPLINK_SERVER_URL`: report endpoint (default: temperatur.nu)
/// - `UPLINK_SKIP_UPLOAD`: format but never send (default: false)
/// - `UPLINK_POST_INTERVAL_SECS`: minimum seconds between deliveries (default: 600)
/// - `UPLINK_MAX_BACKLOG`: newest records retained under backlog, or `none` (default: 1000)
/// - `UPLINK_STALE_SECS`: max record age worth sending (default: no limit)
/// - `UPLINK_LOG_SUCCESS` / `UPLINK_LOG_FAILURE`: per-record logging (default: true)
/// - `UPLINK_TIMEOUT_SECS`: per-request timeout (default: 60)
/// - `UPLINK_MAX_TRIES`: delivery attempts per record (default: 3)
/// - `UPLINK_RETRY_WAIT_SECS`: wait between attempts (default: 5)
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Station credential issued by the destination. Opaque secret; must
    /// never appear in a log line.
    pub hash: String,

    /// Report endpoint URL
    pub server_url: String,

    /// Format requests but skip the network call entirely
    pub skip_upload: bool,

    /// Minimum spacing between delivery attempts
    pub post_interval: Duration,

    /// Newest records retained when the queue backs up; `None` is unbounded
    pub max_backlog: Option<usize>,

    /// Age beyond which a record is not worth sending; `None` is no limit
    pub stale: Option<Duration>,

    /// Log each successful delivery
    pub log_success: bool,

    /// Log each dropped record
    pub log_failure: bool,

    /// Per-request timeout
    pub timeout: Duration,

    /// Delivery attempts per record
    pub max_tries: u32,

    /// Wait between attempts for the same record
    pub retry_wait: Duration,

    /// Unit system the destination expects
    pub target_units: UnitSystem,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl DeliveryConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the station credential is missing or any
    /// recognized variable fails to parse. A missing credential is a startup
    /// failure; the worker never starts without one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let hash = env::var("UPLINK_HASH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError {
                message: "station credential is required".to_string(),
                env_var: Some("UPLINK_HASH".to_string()),
            })?;

        let server_url =
            env::var("UPLINK_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        let skip_upload = parse_bool("UPLINK_SKIP_UPLOAD", false)?;
        let post_interval = Duration::from_secs(parse_u64(
            "UPLINK_POST_INTERVAL_SECS",
            DEFAULT_POST_INTERVAL_SECS,
            1,
        )?);
        let max_backlog = parse_max_backlog()?;
        let stale = parse_optional_u64("UPLINK_STALE_SECS", 1)?.map(Duration::from_secs);
        let log_success = parse_bool("UPLINK_LOG_SUCCESS", true)?;
        let log_failure = parse_bool("UPLINK_LOG_FAILURE", true)?;
        let timeout = Duration::from_secs(parse_u64(
            "UPLINK_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
            1,
        )?);
        let max_tries = parse_u64("UPLINK_MAX_TRIES", DEFAULT_MAX_TRIES as u64, 1)? as u32;
        let retry_wait = Duration::from_secs(parse_u64(
            "UPLINK_RETRY_WAIT_SECS",
            DEFAULT_RETRY_WAIT_SECS,
            0,
        )?);

        Ok(Self {
            hash,
            server_url,
            skip_upload,
            post_interval,
            max_backlog,
            stale,
            log_success,
            log_failure,
            timeout,
            max_tries,
            retry_wait,
            target_units: UnitSystem::MetricWx,
        })
    }
}

impl Default for DeliveryConfig {
    /// Default configuration with a placeholder credential.
    ///
    /// Useful for tests; production configuration always comes through
    /// [`DeliveryConfig::from_env`], which refuses to run without a real
    /// credential.
    fn default() -> Self {
        Self {
            hash: "TESTHASH".to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            skip_upload: false,
            post_interval: Duration::from_secs(DEFAULT_POST_INTERVAL_SECS),
            max_backlog: Some(DEFAULT_MAX_BACKLOG),
            stale: None,
            log_success: true,
            log_failure: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_tries: DEFAULT_MAX_TRIES,
            retry_wait: Duration::from_secs(DEFAULT_RETRY_WAIT_SECS),
            target_units: UnitSystem::MetricWx,
        }
    }
}

/// Parse an integer variable with a lower bound, falling back when unset.
fn parse_u64(var: &str, default: u64, min: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(value) => {
            let parsed: u64 = value.trim().parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(var.to_string()),
            })?;

            if parsed < min {
                return Err(ConfigError {
                    message: format!("{} is below minimum ({})", parsed, min),
                    env_var: Some(var.to_string()),
                });
            }

            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

/// Like [`parse_u64`] but unset means "not configured".
fn parse_optional_u64(var: &str, min: u64) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(_) => parse_u64(var, 0, min).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(ConfigError {
                message: format!("'{}' is not a valid boolean", other),
                env_var: Some(var.to_string()),
            }),
        },
        Err(_) => Ok(default),
    }
}

/// The backlog bound defaults to a bounded value; the literal `none` opts
/// into unbounded retention.
fn parse_max_backlog() -> Result<Option<usize>, ConfigError> {
    const VAR: &str = "UPLINK_MAX_BACKLOG";

    match env::var(VAR) {
        Ok(value) if value.trim().eq_ignore_ascii_case("none") => Ok(None),
        Ok(value) => {
            let parsed: usize = value.trim().parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number or 'none'", value),
                env_var: Some(VAR.to_string()),
            })?;

            if parsed == 0 {
                return Err(ConfigError {
                    message: "backlog limit must be greater than 0 (use 'none' for unbounded)"
                        .to_string(),
                    env_var: Some(VAR.to_string()),
                });
            }

            Ok(Some(parsed))
        }
        Err(_) => Ok(Some(DEFAULT_MAX_BACKLOG)),
    }
}
