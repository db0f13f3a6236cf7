//! # Resource Store
//!
//! CRUD access to managed resources and to the Secrets they reference.
//!
//! The engine only reads objects and patches their status and finalizers:
//!
//! - [`ResourceStore`] - cached reads, live reads, status and finalizer writes
//! - [`SecretSource`] - decoded Secret data (Vault tokens, engine credentials)
//!
//! `kube_store.rs` and `secrets.rs` hold the Kubernetes implementations.

mod kube_store;
mod secrets;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::controller::QueueKey;
use crate::crd::ManagedResource;

pub use kube_store::KubeStore;
pub(crate) use secrets::decode_secret;
pub use secrets::KubeSecretSource;

/// Errors returned by a [`ResourceStore`] or [`SecretSource`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict while writing {0}")]
    Conflict(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a Kubernetes API error for the object identified by `what`
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(what.to_string()),
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(what.to_string()),
            other => Self::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Access to one kind of managed resource
#[async_trait]
pub trait ResourceStore<K: ManagedResource>: Send + Sync {
    /// Object from the local cache, `None` when absent
    fn get_by_key(&self, key: &QueueKey) -> Option<Arc<K>>;

    /// Live object from the API server
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    /// Write the status of `obj`, guarded by its resourceVersion
    async fn replace_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Add `finalizer` to `obj` unless already present
    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError>;

    /// Remove `finalizer` from the live object; an absent object is not an error
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), StoreError>;
}

/// Decoded Secret data
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Data of the Secret, `None` when it does not exist
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError>;
}

/// Whether `obj` carries `finalizer`
pub fn has_finalizer<K: ManagedResource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}
