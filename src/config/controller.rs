//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::sync::Arc;
use std::time::Duration;

/// Shared, read-only controller configuration
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How many times a failing key is requeued before it is dropped
    pub max_num_requeues: u32,
    /// Dispatcher workers per resource kind
    pub num_workers: usize,
    /// Pause between finalizer cleanup attempts (seconds)
    pub finalizer_interval_secs: u64,
    /// Overall budget of one finalization run (seconds)
    pub finalizer_timeout_secs: u64,
    /// Per-key queue backoff base (milliseconds)
    pub queue_backoff_base_ms: u64,
    /// Per-key queue backoff ceiling (seconds)
    pub queue_backoff_max_secs: u64,
    /// Optimistic-concurrency retries for a single status write
    pub status_conflict_retries: u32,
    /// Interval between VaultServer health polls (seconds)
    pub monitor_interval_secs: u64,
    /// Timeout for a single Vault HTTP request (seconds)
    pub vault_request_timeout_secs: u64,
    /// Cluster name embedded in backend role names (`-` when unset)
    pub cluster_name: Option<String>,
    /// Restrict watches to one namespace (all namespaces when unset)
    pub watch_namespace: Option<String>,
    /// Port of the metrics/probe HTTP server
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            max_num_requeues: DEFAULT_MAX_NUM_REQUEUES,
            num_workers: DEFAULT_NUM_WORKERS,
            finalizer_interval_secs: DEFAULT_FINALIZER_INTERVAL_SECS,
            finalizer_timeout_secs: DEFAULT_FINALIZER_TIMEOUT_SECS,
            queue_backoff_base_ms: DEFAULT_QUEUE_BACKOFF_BASE_MS,
            queue_backoff_max_secs: DEFAULT_QUEUE_BACKOFF_MAX_SECS,
            status_conflict_retries: DEFAULT_STATUS_CONFLICT_RETRIES,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            vault_request_timeout_secs: DEFAULT_VAULT_REQUEST_TIMEOUT_SECS,
            cluster_name: None,
            watch_namespace: None,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            max_num_requeues: env_var_or_default("MAX_NUM_REQUEUES", DEFAULT_MAX_NUM_REQUEUES),
            num_workers: env_var_or_default("NUM_WORKERS", DEFAULT_NUM_WORKERS).max(1),
            finalizer_interval_secs: env_var_or_default(
                "FINALIZER_INTERVAL_SECS",
                DEFAULT_FINALIZER_INTERVAL_SECS,
            )
            .max(1),
            finalizer_timeout_secs: env_var_or_default(
                "FINALIZER_TIMEOUT_SECS",
                DEFAULT_FINALIZER_TIMEOUT_SECS,
            ),
            queue_backoff_base_ms: env_var_or_default(
                "QUEUE_BACKOFF_BASE_MS",
                DEFAULT_QUEUE_BACKOFF_BASE_MS,
            ),
            queue_backoff_max_secs: env_var_or_default(
                "QUEUE_BACKOFF_MAX_SECS",
                DEFAULT_QUEUE_BACKOFF_MAX_SECS,
            ),
            status_conflict_retries: env_var_or_default(
                "STATUS_CONFLICT_RETRIES",
                DEFAULT_STATUS_CONFLICT_RETRIES,
            ),
            monitor_interval_secs: env_var_or_default(
                "MONITOR_INTERVAL_SECS",
                DEFAULT_MONITOR_INTERVAL_SECS,
            )
            .max(1),
            vault_request_timeout_secs: env_var_or_default(
                "VAULT_REQUEST_TIMEOUT_SECS",
                DEFAULT_VAULT_REQUEST_TIMEOUT_SECS,
            ),
            cluster_name: env_var_non_empty("CLUSTER_NAME"),
            watch_namespace: env_var_non_empty("WATCH_NAMESPACE"),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: env_var_or_default("LOG_FORMAT", LogFormat::Text),
        }
    }

    /// Get finalizer attempt interval duration (at least one second)
    pub fn finalizer_interval(&self) -> Duration {
        Duration::from_secs(self.finalizer_interval_secs.max(1))
    }

    /// Get finalizer overall timeout duration
    pub fn finalizer_timeout(&self) -> Duration {
        Duration::from_secs(self.finalizer_timeout_secs)
    }

    /// Get queue backoff base duration
    pub fn queue_backoff_base(&self) -> Duration {
        Duration::from_millis(self.queue_backoff_base_ms)
    }

    /// Get queue backoff max duration
    pub fn queue_backoff_max(&self) -> Duration {
        Duration::from_secs(self.queue_backoff_max_secs)
    }

    /// Get health monitor poll interval (at least one second)
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// Get Vault request timeout
    pub fn vault_request_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_request_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable, treating an empty value as unset
fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_budgets() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_num_requeues, 5);
        assert_eq!(config.finalizer_interval(), Duration::from_secs(5));
        assert_eq!(config.finalizer_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue_backoff_base(), Duration::from_millis(5));
        assert_eq!(config.queue_backoff_max(), Duration::from_secs(1000));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = ControllerConfig {
            finalizer_interval_secs: 0,
            monitor_interval_secs: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.finalizer_interval(), Duration::from_secs(1));
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
