//! Pipeline configuration
//!
//! Sizing of the queues and worker pool, flush policy, failure reporting and
//! method/step selection. Values can be written as a struct literal, read with
//! serde (every field has a default), or loaded from `SLUICE_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default number of concurrent dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Default batch size in bytes before a flush is forced (2 MiB).
pub const DEFAULT_PAYLOAD_SIZE_BYTES_THRESHOLD: usize = 2 * 1024 * 1024;

/// Default capacity of the record queue in front of the aggregator.
pub const DEFAULT_OBJECTS_QUEUE_SIZE: usize = 10_000;

/// Default capacity of the batch queue in front of the workers.
pub const DEFAULT_PAYLOADS_QUEUE_SIZE: usize = 50;

/// Default idle time before open batches are flushed.
pub const DEFAULT_PAYLOAD_AGGREGATOR_TIMEOUT_SECS: f64 = 2.0;

const ENV_PREFIX: &str = "SLUICE_";

/// Ingestion pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of worker tasks dispatching batches
    pub worker_count: usize,

    /// A batch is flushed once its serialized size exceeds this many bytes
    pub payload_size_bytes_threshold: usize,

    /// Capacity of the record queue; a full queue blocks `send`
    pub objects_queue_size: usize,

    /// Capacity of the batch queue; a full queue blocks the aggregator
    pub payloads_queue_size: usize,

    /// Longest wait for the next record before all open batches are flushed
    pub payload_aggregator_timeout_secs: f64,

    /// Log every failed dispatch at error level
    pub log_upload_errors: bool,

    /// Make `close` fail when any batch failed to dispatch
    pub raise_exception_on_failure: bool,

    /// Method used when a send names none and no entry of `methods` resolves
    pub default_method: Option<String>,

    /// Ordered preference list of sender methods; first registered one wins
    pub methods: Vec<String>,

    /// Names of pre-processing steps, applied in order
    pub preprocess_steps: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            payload_size_bytes_threshold: DEFAULT_PAYLOAD_SIZE_BYTES_THRESHOLD,
            objects_queue_size: DEFAULT_OBJECTS_QUEUE_SIZE,
            payloads_queue_size: DEFAULT_PAYLOADS_QUEUE_SIZE,
            payload_aggregator_timeout_secs: DEFAULT_PAYLOAD_AGGREGATOR_TIMEOUT_SECS,
            log_upload_errors: true,
            raise_exception_on_failure: true,
            default_method: None,
            methods: Vec::new(),
            preprocess_steps: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `SLUICE_WORKER_COUNT`
    /// - `SLUICE_PAYLOAD_SIZE_BYTES_THRESHOLD`
    /// - `SLUICE_OBJECTS_QUEUE_SIZE`
    /// - `SLUICE_PAYLOADS_QUEUE_SIZE`
    /// - `SLUICE_PAYLOAD_AGGREGATOR_TIMEOUT_SECONDS`
    /// - `SLUICE_LOG_UPLOAD_ERRORS` (true/false)
    /// - `SLUICE_RAISE_EXCEPTION_ON_FAILURE` (true/false)
    /// - `SLUICE_DEFAULT_METHOD`
    /// - `SLUICE_METHODS` (comma separated)
    /// - `SLUICE_PREPROCESS_STEPS` (comma separated)
    pub fn from_env() -> Result<Self> {
        let config = Self::default().merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields of `self` with any `SLUICE_*` variables that are set
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(v) = parse_env("WORKER_COUNT")? {
            self.worker_count = v;
        }
        if let Some(v) = parse_env("PAYLOAD_SIZE_BYTES_THRESHOLD")? {
            self.payload_size_bytes_threshold = v;
        }
        if let Some(v) = parse_env("OBJECTS_QUEUE_SIZE")? {
            self.objects_queue_size = v;
        }
        if let Some(v) = parse_env("PAYLOADS_QUEUE_SIZE")? {
            self.payloads_queue_size = v;
        }
        if let Some(v) = parse_env("PAYLOAD_AGGREGATOR_TIMEOUT_SECONDS")? {
            self.payload_aggregator_timeout_secs = v;
        }
        if let Some(v) = parse_env("LOG_UPLOAD_ERRORS")? {
            self.log_upload_errors = v;
        }
        if let Some(v) = parse_env("RAISE_EXCEPTION_ON_FAILURE")? {
            self.raise_exception_on_failure = v;
        }
        if let Some(v) = env_var("DEFAULT_METHOD") {
            let v = v.trim();
            self.default_method = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = env_var("METHODS") {
            self.methods = split_list(&v);
        }
        if let Some(v) = env_var("PREPROCESS_STEPS") {
            self.preprocess_steps = split_list(&v);
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(IngestError::config("worker_count must be greater than 0"));
        }
        if self.payload_size_bytes_threshold == 0 {
            return Err(IngestError::config(
                "payload_size_bytes_threshold must be greater than 0",
            ));
        }
        if self.objects_queue_size == 0 {
            return Err(IngestError::config("objects_queue_size must be greater than 0"));
        }
        if self.payloads_queue_size == 0 {
            return Err(IngestError::config("payloads_queue_size must be greater than 0"));
        }
        if !self.payload_aggregator_timeout_secs.is_finite()
            || self.payload_aggregator_timeout_secs <= 0.0
        {
            return Err(IngestError::config(format!(
                "payload_aggregator_timeout_secs must be a positive number of seconds, got {}",
                self.payload_aggregator_timeout_secs
            )));
        }
        Duration::try_from_secs_f64(self.payload_aggregator_timeout_secs).map_err(|e| {
            IngestError::config(format!(
                "payload_aggregator_timeout_secs {} is out of range: {e}",
                self.payload_aggregator_timeout_secs
            ))
        })?;
        if self.default_method.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(IngestError::config("default_method cannot be blank"));
        }
        Ok(())
    }

    /// Idle flush timeout as a Duration, saturating for values `validate` rejects
    pub fn payload_aggregator_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.payload_aggregator_timeout_secs).unwrap_or(Duration::MAX)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn parse_env<T>(suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(suffix)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                IngestError::config(format!("{ENV_PREFIX}{suffix}='{raw}' is invalid: {e}"))
            })
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "WORKER_COUNT",
        "PAYLOAD_SIZE_BYTES_THRESHOLD",
        "OBJECTS_QUEUE_SIZE",
        "PAYLOADS_QUEUE_SIZE",
        "PAYLOAD_AGGREGATOR_TIMEOUT_SECONDS",
        "LOG_UPLOAD_ERRORS",
        "RAISE_EXCEPTION_ON_FAILURE",
        "DEFAULT_METHOD",
        "METHODS",
        "PREPROCESS_STEPS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(format!("{ENV_PREFIX}{var}"));
        }
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.payload_size_bytes_threshold, 2_097_152);
        assert_eq!(config.objects_queue_size, 10_000);
        assert_eq!(config.payloads_queue_size, 50);
        assert_eq!(config.payload_aggregator_timeout(), Duration::from_secs(2));
        assert!(config.log_upload_errors);
        assert!(config.raise_exception_on_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var("SLUICE_WORKER_COUNT", "3");
        std::env::set_var("SLUICE_PAYLOAD_AGGREGATOR_TIMEOUT_SECONDS", "0.5");
        std::env::set_var("SLUICE_RAISE_EXCEPTION_ON_FAILURE", "false");
        std::env::set_var("SLUICE_METHODS", "postgres, ,http");
        std::env::set_var("SLUICE_DEFAULT_METHOD", "log");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.payload_aggregator_timeout(), Duration::from_millis(500));
        assert!(!config.raise_exception_on_failure);
        assert_eq!(config.methods, vec!["postgres", "http"]);
        assert_eq!(config.default_method.as_deref(), Some("log"));
        assert!(config.preprocess_steps.is_empty());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_rejects_garbage() {
        clear_env();
        std::env::set_var("SLUICE_OBJECTS_QUEUE_SIZE", "lots");

        let err = IngestConfig::from_env().unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(err.to_string().contains("SLUICE_OBJECTS_QUEUE_SIZE"));

        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let zero_workers = IngestConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(zero_workers.validate().is_err());

        let zero_queue = IngestConfig {
            payloads_queue_size: 0,
            ..Default::default()
        };
        assert!(zero_queue.validate().is_err());

        let bad_timeout = IngestConfig {
            payload_aggregator_timeout_secs: f64::NAN,
            ..Default::default()
        };
        assert!(bad_timeout.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_timeout() {
        let huge = IngestConfig {
            payload_aggregator_timeout_secs: 1e300,
            ..Default::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(err.to_string().contains("out of range"));
        assert_eq!(huge.payload_aggregator_timeout(), Duration::MAX);

        let long = IngestConfig {
            payload_aggregator_timeout_secs: 86_400.0,
            ..Default::default()
        };
        assert!(long.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"worker_count": 2, "methods": ["http"]}"#).unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.methods, vec!["http"]);
        assert_eq!(config.payloads_queue_size, DEFAULT_PAYLOADS_QUEUE_SIZE);
    }
}
