//! # Controller
//!
//! The reconciliation and finalizer engine, generic over the managed kind.
//!
//! - `queue`: deduplicating, rate-limited work queue
//! - `backoff`: exponential per-key backoff used by the queue
//! - `dispatcher`: routes queue keys to the apply or delete path
//! - `strategy`: per-kind reconcile steps (roles, Vault servers)
//! - `finalizer`: background cleanup before a resource may be deleted
//! - `status`: status read-modify-write and condition bookkeeping
//! - `registry`: in-progress finalizations and running monitors

pub mod backoff;
pub mod dispatcher;
pub mod finalizer;
pub mod queue;
pub mod registry;
pub mod status;
pub mod strategy;
mod types;

pub use dispatcher::Dispatcher;
pub use finalizer::{FinalizerManager, FinalizerPhase};
pub use queue::WorkQueue;
pub use registry::{FinalizerLease, FinalizerRegistry, MonitorRegistry};
pub use status::StatusReporter;
pub use strategy::{ReconcileStrategy, RoleStrategy, ServerStrategy};
pub use types::{resource_id, QueueKey, ReconcileError};
