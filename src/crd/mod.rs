//! # Custom Resource Definitions
//!
//! CRD types for the Vault Engine Controller.
//!
//! ## Module Structure
//!
//! - `aws.rs`, `azure.rs`, `gcp.rs`, `database.rs` - role kinds provisioned in Vault secrets engines
//! - `vault_server.rs` - Vault servers deployed by the controller
//! - `vault_ref.rs` - how role kinds reach Vault
//! - `status.rs` - status types shared by every kind

mod aws;
mod azure;
mod database;
mod gcp;
mod status;
mod vault_ref;
mod vault_server;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export all public types
pub use aws::{default_aws_path, AwsEngineConfig, AwsRole, AwsRoleSpec};
pub use azure::{default_azure_path, AzureEngineConfig, AzureRole, AzureRoleSpec};
pub use database::{
    default_database_path, DatabaseEngine, DatabaseRef, DatabaseRole, DatabaseRoleSpec,
    MongoDbConfig, SqlDatabaseConfig,
};
pub use gcp::{default_gcp_path, GcpEngineConfig, GcpRole, GcpRoleSpec};
pub use status::{Condition, ResourceStatus, StatusObject, VaultServerStatus, VaultStatus};
pub use vault_ref::{default_token_key, LeaseConfig, VaultRef};
pub use vault_server::{TlsConfig, VaultServer, VaultServerSpec, VaultStorage};

/// A namespaced kind reconciled by the controller
///
/// Gives the generic engine (queue, dispatcher, finalizer, status reporter)
/// typed access to the status of every kind.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Status: StatusObject + DeserializeOwned;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}

macro_rules! managed_resource {
    ($kind:ty, $status:ty) => {
        impl ManagedResource for $kind {
            type Status = $status;

            fn status(&self) -> Option<&Self::Status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut Option<Self::Status> {
                &mut self.status
            }
        }
    };
}

managed_resource!(AwsRole, ResourceStatus);
managed_resource!(AzureRole, ResourceStatus);
managed_resource!(GcpRole, ResourceStatus);
managed_resource!(DatabaseRole, ResourceStatus);
managed_resource!(VaultServer, VaultServerStatus);
