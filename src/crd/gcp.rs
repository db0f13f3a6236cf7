//! # GCPRole
//!
//! GCP roleset provisioned in a Vault GCP secrets engine.

use serde::{Deserialize, Serialize};

use crate::crd::{ResourceStatus, VaultRef};

/// GCPRole Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "GCPRole",
    root = "GcpRole",
    group = "engine.kubevault.com",
    version = "v1alpha1",
    plural = "gcproles",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpRoleSpec {
    /// Vault server the roleset lives in
    pub vault_ref: VaultRef,
    /// Mount path of the GCP secrets engine
    #[serde(default = "default_gcp_path")]
    pub path: String,
    /// Configuration of the engine
    pub config: GcpEngineConfig,
    /// Secret type: access_token or service_account_key
    #[serde(default = "default_secret_type")]
    pub secret_type: String,
    /// GCP project of the service account
    pub project: String,
    /// Bindings in Vault HCL/JSON format
    pub bindings: String,
    /// OAuth scopes, required for access_token rolesets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_scopes: Vec<String>,
}

/// Configuration of the GCP secrets engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpEngineConfig {
    /// Secret with the service account key under `sa.json`
    pub credential_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<String>,
}

/// Default mount path of the GCP secrets engine
pub fn default_gcp_path() -> String {
    "gcp".to_string()
}

/// Default GCP secret type
pub fn default_secret_type() -> String {
    "access_token".to_string()
}
