//! # Finalizer Lifecycle
//!
//! Background cleanup of a resource marked for deletion.
//!
//! Each finalization runs as its own task, at most one per id:
//!
//! ```text
//! Idle --try_acquire--> Running --+--> Done      (cleanup succeeded, finalizer removed)
//!                                 +--> TimedOut  (deadline reached)
//! ```
//!
//! While running, cleanup is retried every `interval` until it succeeds; after
//! that only the finalizer removal is retried. Whatever the outcome, one last
//! removal is attempted before the id is released. A timeout is logged and
//! counted, never escalated: the next change notification starts over.

use std::sync::Arc;
use std::time::Duration;

use kube::{Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Level};

use crate::constants::FINALIZER;
use crate::controller::registry::FinalizerRegistry;
use crate::controller::strategy::ReconcileStrategy;
use crate::controller::{resource_id, QueueKey};
use crate::crd::ManagedResource;
use crate::observability::metrics;
use crate::store::ResourceStore;

/// State of one finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerPhase {
    Idle,
    Running,
    Done,
    TimedOut,
}

impl FinalizerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Starts and runs finalizations for one kind
pub struct FinalizerManager<K: ManagedResource> {
    store: Arc<dyn ResourceStore<K>>,
    strategy: Arc<dyn ReconcileStrategy<K>>,
    registry: FinalizerRegistry,
    interval: Duration,
    timeout: Duration,
}

impl<K: ManagedResource> Clone for FinalizerManager<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            strategy: Arc::clone(&self.strategy),
            registry: self.registry.clone(),
            interval: self.interval,
            timeout: self.timeout,
        }
    }
}

impl<K: ManagedResource> std::fmt::Debug for FinalizerManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerManager")
            .field("kind", &K::kind(&()))
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> FinalizerManager<K> {
    pub fn new(
        store: Arc<dyn ResourceStore<K>>,
        strategy: Arc<dyn ReconcileStrategy<K>>,
        registry: FinalizerRegistry,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            strategy,
            registry,
            interval,
            timeout,
        }
    }

    pub fn registry(&self) -> &FinalizerRegistry {
        &self.registry
    }

    /// Spawn the finalization of `obj` unless one is already running
    pub fn start(&self, obj: Arc<K>) -> bool {
        let key = QueueKey::from_object(obj.as_ref());
        let id = resource_id::<K>(&key);
        let Some(lease) = self.registry.try_acquire(&id) else {
            debug!(finalizer.id = %id, "Finalization already in progress");
            return false;
        };

        let manager = self.clone();
        let span = tracing::span!(
            Level::INFO,
            "finalize",
            resource.kind = %K::kind(&()),
            resource.namespace = %key.namespace,
            resource.name = %key.name
        );
        tokio::spawn(
            async move {
                // Held for the whole task, released on drop
                let _lease = lease;
                manager.run(obj.as_ref()).await;
            }
            .instrument(span),
        );
        true
    }

    /// Drive one finalization to `Done` or `TimedOut`
    pub async fn run(&self, obj: &K) -> FinalizerPhase {
        let kind = K::kind(&());
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let deadline = Instant::now() + self.timeout;

        info!("Processing finalizer for {kind} {namespace}/{name}");

        let mut finalization_done = false;
        let mut attempt: u32 = 0;

        let phase = loop {
            if Instant::now() >= deadline {
                break FinalizerPhase::TimedOut;
            }
            debug!(attempt, "{kind} {namespace}/{name} finalizer attempt");

            if !finalization_done {
                match self.strategy.finalize(obj).await {
                    Ok(()) => finalization_done = true,
                    Err(e) => error!(attempt, "{kind} {namespace}/{name} finalizer: {e}"),
                }
            }

            if finalization_done {
                match self.store.remove_finalizer(&namespace, &name, FINALIZER).await {
                    Ok(()) => break FinalizerPhase::Done,
                    Err(e) => error!(
                        attempt,
                        "{kind} {namespace}/{name} finalizer: removing finalizer: {e}"
                    ),
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = tokio::time::sleep_until(deadline) => {}
            }
            attempt += 1;
        };

        // Last attempt, covers a removal racing the deadline
        match self.store.remove_finalizer(&namespace, &name, FINALIZER).await {
            Ok(()) => info!("Removed finalizer for {kind} {namespace}/{name}"),
            Err(e) => error!("{kind} {namespace}/{name} finalizer: removing finalizer: {e}"),
        }

        if phase == FinalizerPhase::TimedOut {
            warn!(
                attempt,
                "⏱️ Finalization of {kind} {namespace}/{name} timed out after {:?}",
                self.timeout
            );
        }
        metrics::increment_finalizations(&kind, phase.as_str());
        phase
    }
}
