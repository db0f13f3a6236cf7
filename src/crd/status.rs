//! # Resource Status
//!
//! Status types shared by every kind: phase, conditions and observed generation.

use serde::{Deserialize, Serialize};

/// Status common to every managed resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Current phase of reconciliation
    /// Absent until the first successful reconcile, then "Success"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Conditions represent the latest available observations
    /// At most one condition per type, order of first insertion is kept
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation of the spec the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Failure, Available)
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// Build a condition without a transition time; the reporter stamps it on write
    pub fn new(r#type: &str, status: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }
}

/// Observed state of a deployed Vault server
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    /// Whether Vault reports itself initialized
    pub initialized: bool,
    /// Whether Vault is sealed
    pub sealed: bool,
    /// Whether the probed node is a standby
    pub standby: bool,
    /// Vault version reported by the health endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Last time the health endpoint was probed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
}

/// Status of a VaultServer
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultServerStatus {
    #[serde(flatten)]
    pub common: ResourceStatus,
    /// Health of the deployed server, maintained by the health monitor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_status: Option<VaultStatus>,
}

/// Access to the fields every status carries
pub trait StatusObject:
    Clone + Default + PartialEq + std::fmt::Debug + Serialize + Send + Sync + 'static
{
    fn common(&self) -> &ResourceStatus;
    fn common_mut(&mut self) -> &mut ResourceStatus;
}

impl StatusObject for ResourceStatus {
    fn common(&self) -> &ResourceStatus {
        self
    }

    fn common_mut(&mut self) -> &mut ResourceStatus {
        self
    }
}

impl StatusObject for VaultServerStatus {
    fn common(&self) -> &ResourceStatus {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ResourceStatus {
        &mut self.common
    }
}
