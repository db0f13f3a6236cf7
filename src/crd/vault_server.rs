//! # VaultServer
//!
//! A Vault server deployed and monitored by the controller.

use serde::{Deserialize, Serialize};

use crate::crd::VaultServerStatus;

/// VaultServer Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: engine.kubevault.com/v1alpha1
/// kind: VaultServer
/// metadata:
///   name: vault
///   namespace: demo
/// spec:
///   replicas: 1
///   storage:
///     type: file
///     path: /vault/data
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "VaultServer",
    group = "engine.kubevault.com",
    version = "v1alpha1",
    plural = "vaultservers",
    namespaced,
    status = "VaultServerStatus",
    shortname = "vs",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Sealed", "type":"boolean", "jsonPath":".status.vaultStatus.sealed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultServerSpec {
    /// Number of Vault pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Vault container image
    #[serde(default = "default_image")]
    pub image: String,
    /// User-provided TLS material; a self-signed pair is generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Storage backend of the server
    #[serde(default)]
    pub storage: VaultStorage,
    /// Type of the Service in front of the pods
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Vault API port
    #[serde(default = "default_port")]
    pub port: i32,
}

/// TLS configuration of a VaultServer
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Secret with `ca.crt`, `tls.crt` and `tls.key`
    pub secret_name: String,
}

/// Storage backend of a VaultServer
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VaultStorage {
    #[default]
    Inmem,
    File { path: String },
    Raft { path: String },
}

impl VaultStorage {
    /// Render the `storage` stanza of the Vault HCL configuration
    pub fn to_hcl(&self) -> String {
        match self {
            Self::Inmem => "storage \"inmem\" {}\n".to_string(),
            Self::File { path } => format!("storage \"file\" {{\n  path = \"{path}\"\n}}\n"),
            Self::Raft { path } => format!("storage \"raft\" {{\n  path = \"{path}\"\n}}\n"),
        }
    }

    /// Data directory that must be backed by a volume
    pub fn data_path(&self) -> Option<&str> {
        match self {
            Self::Inmem => None,
            Self::File { path } | Self::Raft { path } => Some(path),
        }
    }
}

pub fn default_replicas() -> i32 {
    1
}

pub fn default_image() -> String {
    "vault:1.2.0".to_string()
}

pub fn default_service_type() -> String {
    "ClusterIP".to_string()
}

pub fn default_port() -> i32 {
    8200
}
