//! Store configuration.
//!
//! # Responsibility
//! - Hold tunables for grouping, aggregate limits, retries and retention.
//! - Parse from JSON supplied by the host application.
//!
//! # Invariants
//! - A validated config has a positive `opened_index_limit`.
//! - Time windows, when set, are strictly positive milliseconds.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default cap for opened index and opened group counts.
pub const DEFAULT_OPENED_INDEX_LIMIT: u32 = 10;
const DEFAULT_MAX_CREATE_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 20;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    ZeroOpenedIndexLimit,
    NonPositiveWindow { field: &'static str, value: i64 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid store config: {message}"),
            Self::ZeroOpenedIndexLimit => write!(f, "opened_index_limit must be positive"),
            Self::NonPositiveWindow { field, value } => {
                write!(f, "{field} must be positive milliseconds, got {value}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Tunables for the notification store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Limit applied to opened indexes and opened group counts.
    pub opened_index_limit: u32,
    /// Extra attempts for the grouping transaction after a lock conflict.
    pub max_create_retries: u32,
    /// Linear backoff step between grouping attempts.
    pub retry_backoff_ms: u64,
    /// SQLite lock wait budget for file-backed connections.
    pub busy_timeout_ms: u64,
    /// Require the same `key` in addition to `(target, group)` to merge.
    pub group_by_key: bool,
    /// Only merge into owners created within this window.
    pub grouping_window_ms: Option<i64>,
    /// Retention period used by purge and expiration-filtered indexes.
    pub expiry_delay_ms: Option<i64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            opened_index_limit: DEFAULT_OPENED_INDEX_LIMIT,
            max_create_retries: DEFAULT_MAX_CREATE_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            group_by_key: false,
            grouping_window_ms: None,
            expiry_delay_ms: None,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON document. Missing fields use defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.opened_index_limit == 0 {
            return Err(ConfigError::ZeroOpenedIndexLimit);
        }
        for (field, value) in [
            ("grouping_window_ms", self.grouping_window_ms),
            ("expiry_delay_ms", self.expiry_delay_ms),
        ] {
            if let Some(value) = value {
                if value <= 0 {
                    return Err(ConfigError::NonPositiveWindow { field, value });
                }
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoreConfig, DEFAULT_OPENED_INDEX_LIMIT};

    #[test]
    fn empty_document_yields_defaults() {
        let config = StoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.opened_index_limit, DEFAULT_OPENED_INDEX_LIMIT);
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let config =
            StoreConfig::from_json_str(r#"{"opened_index_limit": 3, "group_by_key": true}"#)
                .unwrap();
        assert_eq!(config.opened_index_limit, 3);
        assert!(config.group_by_key);
        assert_eq!(config.max_create_retries, StoreConfig::default().max_create_retries);
    }

    #[test]
    fn validation_rejects_zero_limit_and_negative_windows() {
        assert_eq!(
            StoreConfig::from_json_str(r#"{"opened_index_limit": 0}"#),
            Err(ConfigError::ZeroOpenedIndexLimit)
        );
        assert_eq!(
            StoreConfig::from_json_str(r#"{"expiry_delay_ms": -5}"#),
            Err(ConfigError::NonPositiveWindow {
                field: "expiry_delay_ms",
                value: -5
            })
        );
        assert!(matches!(
            StoreConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn retry_backoff_grows_linearly() {
        let config = StoreConfig::default();
        assert_eq!(config.retry_backoff(0).as_millis(), 0);
        assert_eq!(config.retry_backoff(2).as_millis(), 40);
    }
}
