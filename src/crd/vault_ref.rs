//! # Vault Reference
//!
//! How a role resource reaches the Vault server it is provisioned in.

use serde::{Deserialize, Serialize};

/// Connection details for a Vault server
///
/// The token is never inlined: it is read from a Secret in the resource's namespace.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultRef {
    /// Vault address, e.g. https://vault.vault.svc:8200
    pub address: String,
    /// Name of the Secret holding the Vault token
    pub token_secret: String,
    /// Key of the token inside the Secret
    #[serde(default = "default_token_key")]
    pub token_key: String,
    /// PEM encoded CA bundle used to verify the Vault server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// Skip TLS verification of the Vault server
    #[serde(default)]
    pub tls_skip_verify: bool,
}

/// Default key of the token inside the token Secret
pub fn default_token_key() -> String {
    "token".to_string()
}

/// Lease settings of an engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseConfig {
    /// Default lease duration, e.g. "1h"
    pub lease: String,
    /// Maximum lease duration, e.g. "24h"
    pub lease_max: String,
}
