//! # Watch Loop
//!
//! Per-kind wiring: a reflector-backed watch feeding the kind's work queue,
//! and the dispatcher draining it.
//!
//! The reflector updates the cache before the event is turned into a queue
//! key, so the dispatcher always sees the object state the event refers to
//! (including its absence after a delete).
//!
//! Updates that change neither the generation nor the deletion timestamp are
//! not queued: status writes made by the controller itself would otherwise
//! trigger another reconcile.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::{Api, Client, Resource};
use kube_runtime::reflector::{reflector, Store};
use kube_runtime::{watcher, WatchStreamExt};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::{
    Dispatcher, FinalizerManager, FinalizerRegistry, MonitorRegistry, QueueKey, ReconcileStrategy,
    StatusReporter, WorkQueue,
};
use crate::crd::ManagedResource;
use crate::store::{KubeStore, ResourceStore};

/// A kind whose watch is running and whose dispatcher is ready to start
pub struct KindRuntime {
    pub kind: String,
    pub queue: WorkQueue,
    /// Resolves once the first full listing is in the cache
    pub ready: BoxFuture<'static, ()>,
    /// Runs the dispatcher workers until the queue shuts down
    pub run: BoxFuture<'static, ()>,
}

impl Debug for KindRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRuntime")
            .field("kind", &self.kind)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Process-wide state shared by every kind
#[derive(Clone)]
pub struct SharedRuntime {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub finalizers: FinalizerRegistry,
    pub monitors: MonitorRegistry,
}

impl Debug for SharedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRuntime").finish_non_exhaustive()
    }
}

impl SharedRuntime {
    fn api<K: ManagedResource>(&self) -> Api<K> {
        match &self.config.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Start watching `K` and assemble its dispatcher
    ///
    /// `strategy` receives the kind's status reporter and store.
    pub fn start_kind<K, F>(&self, strategy: F) -> KindRuntime
    where
        K: ManagedResource,
        F: FnOnce(StatusReporter<K>) -> Arc<dyn ReconcileStrategy<K>>,
    {
        let kind = K::kind(&()).into_owned();
        let config = &self.config;
        let queue = WorkQueue::new(ExponentialBackoff::new(
            config.queue_backoff_base(),
            config.queue_backoff_max(),
        ));

        let (cache, watch) = watch_kind(self.api::<K>(), queue.clone());
        tokio::spawn(watch);

        let store: Arc<dyn ResourceStore<K>> =
            Arc::new(KubeStore::new(self.client.clone(), cache.clone()));
        let reporter = StatusReporter::new(Arc::clone(&store), config.status_conflict_retries);
        let strategy = strategy(reporter);
        let finalizers = FinalizerManager::new(
            Arc::clone(&store),
            Arc::clone(&strategy),
            self.finalizers.clone(),
            config.finalizer_interval(),
            config.finalizer_timeout(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            store,
            strategy,
            finalizers,
            self.monitors.clone(),
            config.max_num_requeues,
        ));

        let ready_kind = kind.clone();
        let ready = async move {
            if let Err(e) = cache.wait_until_ready().await {
                error!("{ready_kind} cache will never become ready: {e}");
                return;
            }
            info!("{ready_kind} cache synced");
        }
        .boxed();

        let workers = config.num_workers;
        KindRuntime {
            kind,
            queue,
            ready,
            run: dispatcher.run(workers).boxed(),
        }
    }
}

/// Reflect `api` into a cache and push a queue key for every applied or deleted object
///
/// Watch errors are retried with the watcher's default backoff.
pub fn watch_kind<K: ManagedResource>(
    api: Api<K>,
    queue: WorkQueue,
) -> (Store<K>, BoxFuture<'static, ()>) {
    let (reader, writer) = kube_runtime::reflector::store::<K>();
    let kind = K::kind(&()).into_owned();

    let mut filter = ChangeFilter::default();
    let watch = reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .for_each(move |event| {
            match event {
                Ok(event) => handle_event(&kind, &mut filter, &queue, event),
                Err(e) => warn!("{kind} watch error: {e}"),
            }
            futures::future::ready(())
        })
        .boxed();

    (reader, watch)
}

fn handle_event<K: ManagedResource>(
    kind: &str,
    filter: &mut ChangeFilter,
    queue: &WorkQueue,
    event: watcher::Event<K>,
) {
    match event {
        watcher::Event::Apply(obj) => {
            let key = QueueKey::from_object(&obj);
            if filter.observe(&key, &obj) {
                debug!("{kind} {key} changed");
                queue.add(key);
            } else {
                debug!("{kind} {key} skipped, only status or metadata changed");
            }
        }
        watcher::Event::InitApply(obj) => {
            let key = QueueKey::from_object(&obj);
            filter.observe(&key, &obj);
            debug!("{kind} {key} listed");
            queue.add(key);
        }
        watcher::Event::Delete(obj) => {
            let key = QueueKey::from_object(&obj);
            filter.forget(&key);
            debug!("{kind} {key} deleted");
            queue.add(key);
        }
        watcher::Event::Init | watcher::Event::InitDone => {}
    }
}

/// Generation and deletion state last seen for an object
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    generation: Option<i64>,
    deleting: bool,
}

impl Observed {
    fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            generation: meta.generation,
            deleting: meta.deletion_timestamp.is_some(),
        }
    }
}

/// Decides which watch updates are worth a reconcile
///
/// An update is queued when the key is new, its generation moved, or its
/// deletion timestamp appeared.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    seen: HashMap<QueueKey, Observed>,
}

impl ChangeFilter {
    /// Record `obj` and report whether it needs a reconcile
    pub fn observe<K: Resource>(&mut self, key: &QueueKey, obj: &K) -> bool {
        let current = Observed::of(obj);
        match self.seen.insert(key.clone(), current.clone()) {
            Some(previous) => previous != current,
            None => true,
        }
    }

    pub fn forget(&mut self, key: &QueueKey) {
        self.seen.remove(key);
    }
}
