//! # Vault REST Client
//!
//! Minimal client for the parts of the Vault HTTP API the controller uses:
//! secrets engine mounts, engine configuration, roles and health.
//!
//! Every authenticated request carries the `X-Vault-Token` header.
//!
//! References:
//! - [Vault HTTP API](https://developer.hashicorp.com/vault/api-docs)

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::backend::BackendError;

/// Header carrying the Vault token
const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault REST client
#[derive(Clone)]
pub struct VaultClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Entry of `GET /v1/sys/mounts`
#[derive(Debug, Deserialize)]
struct MountInfo {
    #[serde(rename = "type")]
    engine_type: String,
}

/// Mount path to engine type from a `GET /v1/sys/mounts` body
fn parse_mounts(body: serde_json::Value) -> Result<HashMap<String, String>, BackendError> {
    // Newer servers nest mounts under "data", older ones only return them at the top level
    let mounts = body.get("data").cloned().unwrap_or(body);
    let mounts: HashMap<String, serde_json::Value> = serde_json::from_value(mounts)?;

    // Top-level responses mix mounts with request metadata such as request_id
    mounts
        .into_iter()
        .filter(|(_, info)| info.is_object())
        .map(|(path, info)| {
            serde_json::from_value::<MountInfo>(info)
                .map(|mount| (path, mount.engine_type))
                .map_err(BackendError::from)
        })
        .collect()
}

/// Response of `GET /v1/sys/health`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub initialized: bool,
    pub sealed: bool,
    pub standby: bool,
    #[serde(default)]
    pub version: Option<String>,
}

impl VaultClient {
    /// Create a client for the Vault server at `address`
    ///
    /// `ca_bundle` is added to the trusted roots; `skip_verify` disables certificate checks.
    ///
    /// # Errors
    /// Returns an error if the CA bundle cannot be parsed or the HTTP client cannot be built
    pub fn new(
        address: &str,
        token: Option<String>,
        ca_bundle: Option<&str>,
        skip_verify: bool,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(ca) = ca_bundle {
            let certificate = reqwest::Certificate::from_pem(ca.as_bytes())?;
            builder = builder.add_root_certificate(certificate);
        }
        if skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http_client: builder.build()?,
            base_url: address.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request for `/v1/<path>` with the token header
    fn make_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        let request = self.http_client.request(method, url);
        match &self.token {
            Some(token) => request.header(VAULT_TOKEN_HEADER, token),
            None => request,
        }
    }

    /// Turn a non-success response into [`BackendError::Status`]
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            code: status.as_u16(),
            body,
        })
    }

    /// Mounted secrets engines keyed by path (with trailing `/`)
    pub async fn list_mounts(&self) -> Result<HashMap<String, String>, BackendError> {
        let response = self.make_request(Method::GET, "sys/mounts").send().await?;
        let body: serde_json::Value = Self::check(response).await?.json().await?;
        parse_mounts(body)
    }

    /// Mount a secrets engine of `engine_type` at `path`
    pub async fn enable_secrets_engine(
        &self,
        path: &str,
        engine_type: &str,
    ) -> Result<(), BackendError> {
        let response = self
            .make_request(Method::POST, &format!("sys/mounts/{path}"))
            .json(&serde_json::json!({ "type": engine_type }))
            .send()
            .await?;
        Self::check(response).await?;
        debug!("Enabled {engine_type} secrets engine at {path}");
        Ok(())
    }

    /// `POST /v1/<path>` with a JSON payload
    pub async fn write(&self, path: &str, payload: &serde_json::Value) -> Result<(), BackendError> {
        let response = self
            .make_request(Method::POST, path)
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `DELETE /v1/<path>`; a missing object is not an error
    pub async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let response = self.make_request(Method::DELETE, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{path} already absent");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    /// `GET /v1/sys/health`, reporting sealed, standby and uninitialized servers as 200
    pub async fn health(&self) -> Result<HealthResponse, BackendError> {
        let response = self
            .make_request(
                Method::GET,
                "sys/health?standbyok=true&sealedcode=200&uninitcode=200",
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mounts_reads_nested_data() {
        let mounts = parse_mounts(json!({
            "request_id": "abc",
            "data": {
                "aws/": {"type": "aws", "description": ""},
                "sys/": {"type": "system"}
            }
        }))
        .unwrap();
        assert_eq!(mounts.get("aws/").map(String::as_str), Some("aws"));
        assert_eq!(mounts.len(), 2);
    }

    #[test]
    fn test_parse_mounts_skips_top_level_metadata() {
        let mounts = parse_mounts(json!({
            "request_id": "abc",
            "lease_duration": 0,
            "gcp/": {"type": "gcp"}
        }))
        .unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts.get("gcp/").map(String::as_str), Some("gcp"));
    }

    #[test]
    fn test_parse_mounts_rejects_malformed_body() {
        let err = parse_mounts(json!({"data": ["aws/"]})).unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));

        let err = parse_mounts(json!({"data": {"aws/": {"description": "no type"}}})).unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }
}
