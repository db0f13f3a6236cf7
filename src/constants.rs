//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every resource kind managed by this controller
pub const API_GROUP: &str = "engine.kubevault.com";

/// Finalizer marker owned by this controller
pub const FINALIZER: &str = "kubevault.com";

/// Field manager used for server-side apply and status writes
pub const FIELD_MANAGER: &str = "vault-engine-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default number of attempts a failing key gets before it is dropped from the queue
pub const DEFAULT_MAX_NUM_REQUEUES: u32 = 5;

/// Default number of dispatcher workers per resource kind
pub const DEFAULT_NUM_WORKERS: usize = 2;

/// Default pause between finalizer cleanup attempts (seconds)
pub const DEFAULT_FINALIZER_INTERVAL_SECS: u64 = 5;

/// Default overall budget for one finalization run (seconds)
pub const DEFAULT_FINALIZER_TIMEOUT_SECS: u64 = 30;

/// Default per-key queue backoff base (milliseconds)
pub const DEFAULT_QUEUE_BACKOFF_BASE_MS: u64 = 5;

/// Default per-key queue backoff ceiling (seconds)
pub const DEFAULT_QUEUE_BACKOFF_MAX_SECS: u64 = 1000;

/// Default number of optimistic-concurrency retries for a status write
pub const DEFAULT_STATUS_CONFLICT_RETRIES: u32 = 5;

/// Default interval between VaultServer health polls (seconds)
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 10;

/// Default timeout for a single Vault HTTP request (seconds)
pub const DEFAULT_VAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Phase reported once a resource is fully reconciled
pub const PHASE_SUCCESS: &str = "Success";

/// Condition type set when a reconcile step fails
pub const CONDITION_FAILURE: &str = "Failure";

/// Condition type set when a resource is fully reconciled
pub const CONDITION_AVAILABLE: &str = "Available";

/// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
