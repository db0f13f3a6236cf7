//! Pact contract tests for the Vault HTTP API
//!
//! These tests define the contract between the Vault Engine Controller and Vault.
//! They use Pact to create a mock server that simulates Vault responses and drive
//! it through the controller's own `VaultClient`.

mod common;

use std::time::Duration;

use common::init_rustls;
use pact_consumer::prelude::*;
use serde_json::json;
use vault_engine_controller::backend::{BackendError, VaultClient};

const TOKEN: &str = "test-vault-token";

/// `url` is the mock server URL; its trailing slash is stripped by the client
fn client_for(url: &str) -> VaultClient {
    init_rustls();
    VaultClient::new(
        url,
        Some(TOKEN.to_string()),
        None,
        false,
        Duration::from_secs(5),
    )
    .expect("Failed to build Vault client")
}

#[tokio::test]
async fn test_vault_list_mounts_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    pact_builder.interaction("list mounted secrets engines", "", |mut i| {
        i.given("the aws secrets engine is mounted at aws/");
        i.request
            .method("GET")
            .path("/v1/sys/mounts")
            .header("x-vault-token", TOKEN);
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "data": {
                    "aws/": {"type": "aws", "description": ""},
                    "sys/": {"type": "system", "description": "system endpoints"}
                }
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let mounts = client_for(mock_server.url().as_str())
        .list_mounts()
        .await
        .expect("Failed to list mounts");

    assert_eq!(mounts.get("aws/").map(String::as_str), Some("aws"));
    assert_eq!(mounts.get("sys/").map(String::as_str), Some("system"));
}

#[tokio::test]
async fn test_vault_enable_secrets_engine_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    pact_builder.interaction("mount the database secrets engine", "", |mut i| {
        i.given("no secrets engine is mounted at database/");
        i.request
            .method("POST")
            .path("/v1/sys/mounts/database")
            .header("x-vault-token", TOKEN)
            .json_body(json!({"type": "database"}));
        i.response.status(204);
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    client_for(mock_server.url().as_str())
        .enable_secrets_engine("database", "database")
        .await
        .expect("Failed to enable secrets engine");
}

#[tokio::test]
async fn test_vault_write_role_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    let role = json!({
        "credential_type": "iam_user",
        "policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"]
    });
    pact_builder.interaction("create or update an aws role", "", |mut i| {
        i.given("the aws secrets engine is mounted at aws/");
        i.request
            .method("POST")
            .path("/v1/aws/roles/k8s.-.ns.foo")
            .header("x-vault-token", TOKEN)
            .json_body(role.clone());
        i.response.status(204);
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    client_for(mock_server.url().as_str())
        .write("aws/roles/k8s.-.ns.foo", &role)
        .await
        .expect("Failed to write role");
}

#[tokio::test]
async fn test_vault_delete_missing_role_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    pact_builder.interaction("delete a roleset that does not exist", "", |mut i| {
        i.given("roleset k8s.-.ns.gone does not exist");
        i.request
            .method("DELETE")
            .path("/v1/gcp/roleset/k8s.-.ns.gone")
            .header("x-vault-token", TOKEN);
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(json!({"errors": []}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    client_for(mock_server.url().as_str())
        .delete("gcp/roleset/k8s.-.ns.gone")
        .await
        .expect("A missing role should be treated as deleted");
}

#[tokio::test]
async fn test_vault_permission_denied_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    let config = json!({"subscription_id": "sub", "tenant_id": "tenant"});
    pact_builder.interaction("write azure config with a token lacking permission", "", |mut i| {
        i.given("the token has no policy for azure/config");
        i.request
            .method("POST")
            .path("/v1/azure/config")
            .header("x-vault-token", TOKEN)
            .json_body(config.clone());
        i.response
            .status(403)
            .header("content-type", "application/json")
            .json_body(json!({"errors": ["permission denied"]}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let err = client_for(mock_server.url().as_str())
        .write("azure/config", &config)
        .await
        .expect_err("A 403 must surface as an error");

    match err {
        BackendError::Status { code, body } => {
            assert_eq!(code, 403);
            assert!(body.contains("permission denied"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_vault_health_contract() {
    let mut pact_builder = PactBuilder::new("Vault-Engine-Controller", "Vault");

    pact_builder.interaction("read health of a sealed server", "", |mut i| {
        i.given("the server is initialized and sealed");
        i.request
            .method("GET")
            .path("/v1/sys/health")
            .query_param("standbyok", "true")
            .query_param("sealedcode", "200")
            .query_param("uninitcode", "200");
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "initialized": true,
                "sealed": true,
                "standby": false,
                "version": "1.2.0",
                "cluster_name": "vault-cluster"
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let health = client_for(mock_server.url().as_str())
        .health()
        .await
        .expect("Failed to read health");

    assert!(health.initialized);
    assert!(health.sealed);
    assert!(!health.standby);
    assert_eq!(health.version.as_deref(), Some("1.2.0"));
}
