//! # Kubernetes Resource Store
//!
//! [`ResourceStore`] backed by a reflector cache for reads and `Api<K>` for writes.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube_runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::controller::QueueKey;
use crate::crd::ManagedResource;
use crate::store::{has_finalizer, ResourceStore, StoreError};

/// Kubernetes implementation of [`ResourceStore`]
pub struct KubeStore<K: ManagedResource> {
    client: Client,
    cache: Store<K>,
}

impl<K: ManagedResource> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &K::kind(&()))
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> KubeStore<K> {
    pub fn new(client: Client, cache: Store<K>) -> Self {
        Self { client, cache }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe<K: ManagedResource>(namespace: &str, name: &str) -> String {
    format!("{} {namespace}/{name}", K::kind(&()))
}

/// Parameters of the merge patches guarded by resourceVersion
///
/// Field managers only apply to server-side apply.
fn metadata_patch_params() -> PatchParams {
    PatchParams::default()
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for KubeStore<K> {
    fn get_by_key(&self, key: &QueueKey) -> Option<Arc<K>> {
        self.cache
            .get(&ObjectRef::new(&key.name).within(&key.namespace))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &describe::<K>(namespace, name)))
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        // Merge patch carrying resourceVersion: the API server rejects it with 409
        // when the object changed since it was read.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": obj.status(),
        });

        self.api(&namespace)
            .patch_status(&name, &metadata_patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &describe::<K>(&namespace, &name)))
    }

    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError> {
        if has_finalizer(obj, finalizer) {
            return Ok(());
        }

        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut finalizers = obj.finalizers().to_vec();
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": finalizers,
            }
        });

        self.api(&namespace)
            .patch(&name, &metadata_patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &describe::<K>(&namespace, &name)))?;

        debug!(
            resource.kind = %K::kind(&()),
            resource.namespace = %namespace,
            resource.name = %name,
            "Added finalizer {finalizer}"
        );
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        let live = match self.get(namespace, name).await {
            Ok(obj) => obj,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if !has_finalizer(&live, finalizer) {
            return Ok(());
        }

        let finalizers: Vec<String> = live
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": live.resource_version(),
                "finalizers": finalizers,
            }
        });

        match self
            .api(namespace)
            .patch(name, &metadata_patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(StoreError::from_kube(e, &describe::<K>(namespace, name))),
        }
    }
}
