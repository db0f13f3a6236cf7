//! # Backends
//!
//! Capability traits the reconcile strategies drive, and their implementations.
//!
//! - [`RoleBackend`] - secrets engine and role lifecycle in Vault (`vault.rs`, `engine.rs`)
//! - [`ServerTopology`] - Kubernetes objects making up a Vault server (`topology.rs`)
//! - [`HealthProbe`] - health of a deployed Vault server (`health.rs`)

mod engine;
mod health;
mod topology;
mod vault;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{VaultServer, VaultStatus};
use crate::store::StoreError;

pub use engine::{role_name, EngineConfig, RoleSpec, VaultBackendFactory, VaultRoleBackend};
pub use health::VaultHealthProbe;
pub use topology::{render_vault_config, KubeServerTopology, TlsMaterial};
pub use vault::{HealthResponse, VaultClient};

/// Errors returned by backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Vault request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vault returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("unexpected Vault response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
}

/// Secrets engine and role lifecycle of one role resource
#[async_trait]
pub trait RoleBackend: Send + Sync {
    /// Mount the secrets engine unless already mounted
    async fn enable_engine(&self) -> Result<(), BackendError>;

    /// Write the engine connection configuration
    async fn write_config(&self) -> Result<(), BackendError>;

    /// Create the role, or overwrite it with the current parameters
    async fn create_or_update_role(&self) -> Result<(), BackendError>;

    /// Delete role `name`; an absent role is not an error
    async fn delete_role(&self, name: &str) -> Result<(), BackendError>;
}

/// Builds a [`RoleBackend`] for a resource
///
/// Called on every reconcile and finalize since credentials may change between runs.
#[async_trait]
pub trait RoleBackendFactory<K>: Send + Sync {
    async fn backend_for(&self, obj: &K) -> Result<Box<dyn RoleBackend>, BackendError>;
}

/// Kubernetes objects making up a Vault server
#[async_trait]
pub trait ServerTopology: Send + Sync {
    /// Ensure TLS material exists (user-provided or self-signed)
    async fn ensure_tls(&self, server: &VaultServer) -> Result<TlsMaterial, BackendError>;

    /// Ensure the Vault HCL configuration is rendered
    async fn ensure_config(&self, server: &VaultServer) -> Result<(), BackendError>;

    /// Ensure ServiceAccount, Service and Deployment are applied
    async fn ensure_deployed(&self, server: &VaultServer) -> Result<(), BackendError>;

    /// Ensure the connection binding for clients is published
    async fn ensure_binding(
        &self,
        server: &VaultServer,
        tls: &TlsMaterial,
    ) -> Result<(), BackendError>;
}

/// Health of a deployed Vault server
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, server: &VaultServer) -> Result<VaultStatus, BackendError>;
}
