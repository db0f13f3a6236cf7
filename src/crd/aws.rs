//! # AWSRole
//!
//! Dynamic AWS credentials role provisioned in a Vault AWS secrets engine.

use serde::{Deserialize, Serialize};

use crate::crd::{LeaseConfig, ResourceStatus, VaultRef};

/// AWSRole Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: engine.kubevault.com/v1alpha1
/// kind: AWSRole
/// metadata:
///   name: s3-reader
///   namespace: demo
/// spec:
///   vaultRef:
///     address: http://vault.demo.svc:8200
///     tokenSecret: vault-token
///   config:
///     credentialSecret: aws-cred
///     region: us-east-1
///   credentialType: iam_user
///   policyArns:
///     - arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "AWSRole",
    root = "AwsRole",
    group = "engine.kubevault.com",
    version = "v1alpha1",
    plural = "awsroles",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AwsRoleSpec {
    /// Vault server the role lives in
    pub vault_ref: VaultRef,
    /// Mount path of the AWS secrets engine
    #[serde(default = "default_aws_path")]
    pub path: String,
    /// Root configuration of the engine
    pub config: AwsEngineConfig,
    /// Credential type: iam_user, assumed_role or federation_token
    pub credential_type: String,
    /// Role ARNs that may be assumed (assumed_role)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_arns: Vec<String>,
    /// Managed policy ARNs attached to generated users
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_arns: Vec<String>,
    /// Inline IAM policy document (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_document: Option<String>,
    /// Default TTL of STS credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sts_ttl: Option<String>,
    /// Maximum TTL of STS credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sts_ttl: Option<String>,
}

/// Root configuration of the AWS secrets engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsEngineConfig {
    /// Secret with `access_key` and `secret_key`
    pub credential_secret: String,
    /// AWS region
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sts_endpoint: Option<String>,
    /// Number of retries of AWS calls, -1 for the SDK default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_config: Option<LeaseConfig>,
}

/// Default mount path of the AWS secrets engine
pub fn default_aws_path() -> String {
    "aws".to_string()
}
