//! Environment-driven configuration.
//!
//! Values load from the process environment (after `dotenvy::dotenv()`) and
//! are validated once at startup. Invalid values fail fast as
//! [`Error::Configuration`], never as runtime crashes.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for the resource sampler and its persistence policy.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Gates whether the sampler starts at all.
    pub enabled: bool,
    /// Sampling interval.
    pub interval: Duration,
    /// Total storage attempts per sample write (initial attempt included).
    pub max_retry_attempts: u32,
    /// Base backoff delay between storage attempts.
    pub backoff_base: Duration,
    /// Cap on the backoff delay.
    pub backoff_max: Duration,
    /// Per-storage-attempt timeout; elapsing it is a transient failure.
    pub attempt_timeout: Duration,
    /// Scratch directory measured by the disk usage metric.
    pub temp_dir: PathBuf,
    /// Stable identifier of the machine/container this process runs on.
    pub host: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            max_retry_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(5),
            temp_dir: std::env::temp_dir(),
            host: detect_host(),
        }
    }
}

impl MonitorConfig {
    /// Load the monitor config from environment variables, falling back to
    /// defaults, and validate it.
    ///
    /// Supported env vars: `MONITOR_ENABLED`, `MONITOR_INTERVAL_MS`,
    /// `MONITOR_MAX_RETRY_ATTEMPTS`, `MONITOR_BACKOFF_BASE_MS`,
    /// `MONITOR_BACKOFF_MAX_MS`, `MONITOR_ATTEMPT_TIMEOUT_MS`,
    /// `MONITOR_TEMP_DIR`, `MONITOR_HOST`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = env_var("MONITOR_ENABLED") {
            config.enabled = parse_bool("MONITOR_ENABLED", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_INTERVAL_MS") {
            config.interval = parse_duration_ms("MONITOR_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_MAX_RETRY_ATTEMPTS") {
            config.max_retry_attempts = parse_u32("MONITOR_MAX_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_BACKOFF_BASE_MS") {
            config.backoff_base = parse_duration_ms("MONITOR_BACKOFF_BASE_MS", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_BACKOFF_MAX_MS") {
            config.backoff_max = parse_duration_ms("MONITOR_BACKOFF_MAX_MS", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_ATTEMPT_TIMEOUT_MS") {
            config.attempt_timeout = parse_duration_ms("MONITOR_ATTEMPT_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = env_var("MONITOR_TEMP_DIR") {
            config.temp_dir = PathBuf::from(raw);
        }
        if let Some(raw) = env_var("MONITOR_HOST") {
            config.host = raw;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the sampler relies on.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("monitor interval must be positive"));
        }
        if self.max_retry_attempts == 0 {
            return Err(Error::config("monitor max retry attempts must be at least 1"));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::config("monitor backoff base must be positive"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::config(format!(
                "monitor backoff base {:?} exceeds max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::config("monitor attempt timeout must be positive"));
        }
        if self.host.trim().is_empty() {
            return Err(Error::config("monitor host identifier must not be empty"));
        }
        Ok(())
    }
}

/// Auto-detect the host identifier, falling back to a fixed sentinel.
pub fn detect_host() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

/// SQLite database URL from the environment, with a local-file default.
pub fn database_url() -> String {
    env_var("DATABASE_URL").unwrap_or_else(|| "sqlite:vitals.db?mode=rwc".to_string())
}

/// Log directory from the environment, with a local default.
pub fn log_dir() -> String {
    env_var("LOG_DIR").unwrap_or_else(|| "./logs".to_string())
}

fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_duration_ms(name: &str, raw: &str) -> Result<Duration> {
    let ms: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{name} must be an integer, got '{raw}'")))?;
    if ms <= 0 {
        return Err(Error::config(format!(
            "{name} must be a positive number of milliseconds, got {ms}"
        )));
    }
    Ok(Duration::from_millis(ms as u64))
}

fn parse_u32(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{name} must be a non-negative integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let config = MonitorConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = MonitorConfig {
            max_retry_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn inverted_backoff_rejected() {
        let config = MonitorConfig {
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn empty_host_rejected() {
        let config = MonitorConfig {
            host: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "FALSE").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn duration_parsing_rejects_non_positive() {
        assert_eq!(
            parse_duration_ms("X", "1500").unwrap(),
            Duration::from_millis(1500)
        );
        assert!(parse_duration_ms("X", "0").is_err());
        assert!(parse_duration_ms("X", "-100").is_err());
        assert!(parse_duration_ms("X", "soon").is_err());
    }
}
