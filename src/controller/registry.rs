//! # Task Registries
//!
//! Process-wide bookkeeping for background work, keyed by `<plural>/<namespace>/<name>`.
//!
//! - [`FinalizerRegistry`] - ids with a finalization in progress; a [`FinalizerLease`]
//!   releases its id when dropped, however the task ends
//! - [`MonitorRegistry`] - long-lived monitors, each with its own cancellation token
//!
//! Both only expose add-if-absent and remove-if-present operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::observability::metrics;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ids of resources currently being finalized
#[derive(Debug, Clone, Default)]
pub struct FinalizerRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl FinalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`; `None` when a finalization for it is already running
    pub fn try_acquire(&self, id: &str) -> Option<FinalizerLease> {
        lock(&self.active).insert(id.to_string()).then(|| FinalizerLease {
            id: id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.active).contains(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on a finalization id, released on drop
#[derive(Debug)]
pub struct FinalizerLease {
    id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl FinalizerLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for FinalizerLease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

#[derive(Debug, Default)]
struct Monitors {
    next_generation: u64,
    entries: HashMap<String, (u64, CancellationToken)>,
}

/// Running monitors and their cancellation tokens
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    monitors: Arc<Mutex<Monitors>>,
    root: CancellationToken,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` as the monitor for `id` unless one is already running
    ///
    /// The task is raced against its cancellation token; the entry is removed
    /// when the task finishes on its own.
    pub fn start_if_absent(&self, id: &str, task: BoxFuture<'static, ()>) -> bool {
        let (generation, token) = {
            let mut monitors = lock(&self.monitors);
            if monitors.entries.contains_key(id) || self.root.is_cancelled() {
                return false;
            }
            monitors.next_generation += 1;
            let generation = monitors.next_generation;
            let token = self.root.child_token();
            monitors
                .entries
                .insert(id.to_string(), (generation, token.clone()));
            metrics::set_active_monitors(monitors.entries.len());
            (generation, token)
        };

        debug!(monitor.id = %id, "Starting monitor");
        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = task => {}
            }
            registry.remove_generation(&id, generation);
        });
        true
    }

    /// Drop the entry only if it still belongs to the task that is finishing
    fn remove_generation(&self, id: &str, generation: u64) {
        let mut monitors = lock(&self.monitors);
        if monitors
            .entries
            .get(id)
            .is_some_and(|(current, _)| *current == generation)
        {
            monitors.entries.remove(id);
            metrics::set_active_monitors(monitors.entries.len());
        }
    }

    /// Cancel and remove the monitor for `id`, if any
    pub fn stop(&self, id: &str) -> bool {
        let mut monitors = lock(&self.monitors);
        let Some((_, token)) = monitors.entries.remove(id) else {
            return false;
        };
        token.cancel();
        metrics::set_active_monitors(monitors.entries.len());
        debug!(monitor.id = %id, "Stopped monitor");
        true
    }

    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.monitors).entries.contains_key(id)
    }

    /// Cancel every monitor and refuse new ones
    pub fn cancel_all(&self) {
        self.root.cancel();
        let mut monitors = lock(&self.monitors);
        monitors.entries.clear();
        metrics::set_active_monitors(0);
    }

    pub fn len(&self) -> usize {
        lock(&self.monitors).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    #[test]
    fn test_finalizer_lease_is_exclusive_and_released_on_drop() {
        let registry = FinalizerRegistry::new();
        let lease = registry.try_acquire("awsroles/ns/foo").unwrap();
        assert!(registry.try_acquire("awsroles/ns/foo").is_none());
        assert!(registry.try_acquire("awsroles/ns/bar").is_some());
        assert!(registry.is_active("awsroles/ns/foo"));

        drop(lease);
        assert!(!registry.is_active("awsroles/ns/foo"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_starts_once_and_stops_on_cancel() {
        let registry = MonitorRegistry::new();
        let id = "vaultservers/ns/vault";

        assert!(registry.start_if_absent(id, futures::future::pending().boxed()));
        assert!(!registry.start_if_absent(id, futures::future::pending().boxed()));
        assert!(registry.is_active(id));

        assert!(registry.stop(id));
        assert!(!registry.is_active(id));
        assert!(!registry.stop(id));
    }

    #[tokio::test]
    async fn test_finished_monitor_removes_its_entry() {
        let registry = MonitorRegistry::new();
        let id = "vaultservers/ns/vault";
        assert!(registry.start_if_absent(id, async {}.boxed()));

        for _ in 0..50 {
            if !registry.is_active(id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!registry.is_active(id));
    }

    #[tokio::test]
    async fn test_cancel_all_refuses_new_monitors() {
        let registry = MonitorRegistry::new();
        registry.start_if_absent("a", futures::future::pending().boxed());
        registry.start_if_absent("b", futures::future::pending().boxed());
        assert_eq!(registry.len(), 2);

        registry.cancel_all();
        assert!(registry.is_empty());
        assert!(!registry.start_if_absent("c", futures::future::pending().boxed()));
    }
}
