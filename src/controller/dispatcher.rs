//! # Reconcile Dispatcher
//!
//! Pulls keys from a kind's [`WorkQueue`] and routes each one:
//!
//! - absent from the cache: stop the key's monitor, nothing else
//! - marked for deletion with our finalizer: start the finalizer lifecycle
//! - alive: ensure our finalizer, reconcile, then start the monitor if any
//!
//! Errors go back to the queue: requeued with backoff while the key has retries
//! left, then dropped and logged.

use std::sync::Arc;
use std::time::Instant;

use kube::Resource;
use tracing::{debug, error, warn, Instrument, Level};

use crate::constants::FINALIZER;
use crate::controller::finalizer::FinalizerManager;
use crate::controller::queue::WorkQueue;
use crate::controller::registry::MonitorRegistry;
use crate::controller::strategy::ReconcileStrategy;
use crate::controller::{resource_id, QueueKey, ReconcileError};
use crate::crd::ManagedResource;
use crate::observability::metrics;
use crate::store::{has_finalizer, ResourceStore};

pub struct Dispatcher<K: ManagedResource> {
    kind: String,
    queue: WorkQueue,
    store: Arc<dyn ResourceStore<K>>,
    strategy: Arc<dyn ReconcileStrategy<K>>,
    finalizers: FinalizerManager<K>,
    monitors: MonitorRegistry,
    max_num_requeues: u32,
}

impl<K: ManagedResource> std::fmt::Debug for Dispatcher<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kind", &self.kind)
            .field("max_num_requeues", &self.max_num_requeues)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> Dispatcher<K> {
    pub fn new(
        queue: WorkQueue,
        store: Arc<dyn ResourceStore<K>>,
        strategy: Arc<dyn ReconcileStrategy<K>>,
        finalizers: FinalizerManager<K>,
        monitors: MonitorRegistry,
        max_num_requeues: u32,
    ) -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            queue,
            store,
            strategy,
            finalizers,
            monitors,
            max_num_requeues,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Process one key; `false` once the queue is shut down
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        metrics::set_queue_depth(&self.kind, self.queue.len());

        let span = tracing::span!(
            Level::INFO,
            "reconcile",
            resource.kind = %self.kind,
            resource.namespace = %key.namespace,
            resource.name = %key.name
        );
        let result = self.sync(&key).instrument(span).await;
        self.handle_result(&key, result);
        self.queue.done(&key);
        true
    }

    /// Apply the retry policy to the outcome of one sync
    fn handle_result(&self, key: &QueueKey, result: Result<(), ReconcileError>) {
        let Err(err) = result else {
            self.queue.forget(key);
            return;
        };
        let err = err.for_resource(&self.kind, key);
        metrics::increment_reconciliation_errors(&self.kind);

        let attempts = self.queue.num_requeues(key);
        if attempts < self.max_num_requeues {
            warn!(
                resource.kind = %self.kind,
                attempt = attempts + 1,
                "Error syncing {key}, requeuing: {err}"
            );
            self.queue.add_rate_limited(key.clone());
            metrics::increment_requeues(&self.kind);
        } else {
            self.queue.forget(key);
            error!(
                resource.kind = %self.kind,
                "Dropping {key} out of the queue after {attempts} attempts: {err}"
            );
            metrics::increment_dropped(&self.kind);
        }
    }

    /// Route `key` to the apply or delete path
    pub async fn sync(&self, key: &QueueKey) -> Result<(), ReconcileError> {
        let id = resource_id::<K>(key);

        let Some(obj) = self.store.get_by_key(key) else {
            debug!("{} {key} does not exist anymore", self.kind);
            self.monitors.stop(&id);
            return Ok(());
        };

        if obj.meta().deletion_timestamp.is_some() {
            if has_finalizer(obj.as_ref(), FINALIZER) {
                self.finalizers.start(obj);
            } else {
                debug!("{} {key} is being deleted without our finalizer", self.kind);
            }
            return Ok(());
        }

        if !has_finalizer(obj.as_ref(), FINALIZER) {
            self.store.add_finalizer(obj.as_ref(), FINALIZER).await?;
            debug!("Added finalizer to {} {key}", self.kind);
        }

        metrics::increment_reconciliations(&self.kind);
        let start = Instant::now();
        let result = self.strategy.reconcile(obj.as_ref()).await;
        metrics::observe_reconciliation_duration(&self.kind, start.elapsed().as_secs_f64());
        result?;

        if !self.monitors.is_active(&id) {
            if let Some(task) = self.strategy.monitor(obj.as_ref()) {
                self.monitors.start_if_absent(&id, task);
            }
        }
        Ok(())
    }

    /// Run `workers` loops until the queue shuts down
    pub async fn run(self: Arc<Self>, workers: usize) {
        let handles: Vec<_> = (0..workers.max(1))
            .map(|_| {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move { while dispatcher.process_next().await {} })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            if let Err(e) = handle {
                error!("{} worker stopped unexpectedly: {e}", self.kind);
            }
        }
        debug!("{} dispatcher stopped", self.kind);
    }
}
