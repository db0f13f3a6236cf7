//! # Status Reporter
//!
//! Read-modify-write of resource status with optimistic concurrency.
//!
//! Every write starts from the live object, so a stale cached copy never
//! overwrites newer status. Writes that would not change anything are skipped
//! to avoid generating watch events.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::controller::ReconcileError;
use crate::crd::{Condition, ManagedResource};
use crate::store::ResourceStore;

/// Writes status for one kind through a [`ResourceStore`]
pub struct StatusReporter<K: ManagedResource> {
    store: Arc<dyn ResourceStore<K>>,
    conflict_retries: u32,
}

impl<K: ManagedResource> std::fmt::Debug for StatusReporter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("conflict_retries", &self.conflict_retries)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> Clone for StatusReporter<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            conflict_retries: self.conflict_retries,
        }
    }
}

impl<K: ManagedResource> StatusReporter<K> {
    pub fn new(store: Arc<dyn ResourceStore<K>>, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore<K>> {
        &self.store
    }

    /// Apply `mutate` to the live status of `obj` and write it back
    ///
    /// Returns the object as stored afterwards. A `409 Conflict` re-reads the
    /// object and retries, up to `conflict_retries` times.
    pub async fn patch_status<F>(&self, obj: &K, mut mutate: F) -> Result<K, ReconcileError>
    where
        F: FnMut(&mut K::Status) + Send,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut attempt = 0;

        loop {
            let mut live = self.store.get(&namespace, &name).await?;
            let current = live.status().cloned().unwrap_or_default();
            let mut updated = current.clone();
            mutate(&mut updated);

            if updated == current {
                debug!(
                    resource.namespace = %namespace,
                    resource.name = %name,
                    "Skipping status update - status unchanged"
                );
                return Ok(live);
            }

            *live.status_mut() = Some(updated);
            match self.store.replace_status(&live).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.is_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(
                        resource.namespace = %namespace,
                        resource.name = %name,
                        attempt,
                        "Status write conflicted, retrying with the latest object"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Insert `condition`, replacing an existing one of the same type in place
///
/// `lastTransitionTime` moves only when the status value changes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|existing| existing.r#type == condition.r#type)
    {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.take()
            } else {
                Some(chrono::Utc::now().to_rfc3339())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            conditions.push(condition);
        }
    }
}

/// Remove the condition of type `condition_type`, if present
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) {
    conditions.retain(|c| c.r#type != condition_type);
}
