//! # AzureRole
//!
//! Azure service principal role provisioned in a Vault Azure secrets engine.

use serde::{Deserialize, Serialize};

use crate::crd::{ResourceStatus, VaultRef};

/// AzureRole Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "AzureRole",
    group = "engine.kubevault.com",
    version = "v1alpha1",
    plural = "azureroles",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureRoleSpec {
    /// Vault server the role lives in
    pub vault_ref: VaultRef,
    /// Mount path of the Azure secrets engine
    #[serde(default = "default_azure_path")]
    pub path: String,
    /// Access configuration of the engine
    pub config: AzureEngineConfig,
    /// JSON list of Azure role assignments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_roles: Option<String>,
    /// Object id of an existing application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<String>,
}

/// Access configuration of the Azure secrets engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureEngineConfig {
    /// Secret with `subscription-id`, `tenant-id` and optionally `client-id`, `client-secret`
    pub credential_secret: String,
    /// Azure environment, e.g. AzurePublicCloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Default mount path of the Azure secrets engine
pub fn default_azure_path() -> String {
    "azure".to_string()
}
