//! # Secrets Engines
//!
//! Engine-specific payloads for the role kinds, and the Vault-backed [`RoleBackend`].
//!
//! The engine variant (AWS, Azure, GCP or one of the database plugins) is selected once
//! when the backend is built; the backend itself only sends the prepared requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::{BackendError, RoleBackend, RoleBackendFactory, VaultClient};
use crate::crd::{
    AwsEngineConfig, AwsRole, AzureEngineConfig, AzureRole, DatabaseEngine, DatabaseRole,
    GcpEngineConfig, GcpRole, ManagedResource, VaultRef,
};
use crate::store::SecretSource;

/// Name of a role at the backend: `k8s.<cluster|->.<namespace>.<name>`
pub fn role_name(cluster: Option<&str>, namespace: &str, name: &str) -> String {
    format!("k8s.{}.{namespace}.{name}", cluster.unwrap_or("-"))
}

/// Engine configuration of a role resource, selected once per backend
#[derive(Debug, Clone)]
pub enum EngineConfig {
    Aws(AwsEngineConfig),
    Azure(AzureEngineConfig),
    Gcp(GcpEngineConfig),
    Database {
        /// Name of the connection in Vault
        connection: String,
        engine: DatabaseEngine,
    },
}

impl EngineConfig {
    /// Engine type passed to `sys/mounts`
    pub fn engine_type(&self) -> &'static str {
        match self {
            Self::Aws(_) => "aws",
            Self::Azure(_) => "azure",
            Self::Gcp(_) => "gcp",
            Self::Database { .. } => "database",
        }
    }

    /// Path segment under the mount where roles live
    pub fn role_prefix(&self) -> &'static str {
        match self {
            Self::Gcp(_) => "roleset",
            _ => "roles",
        }
    }

    /// Configuration writes as `(path relative to the mount, payload)`, credentials resolved
    ///
    /// # Errors
    /// Returns an error if a credential Secret is missing or lacks a required key
    pub async fn config_requests(
        &self,
        namespace: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Vec<(String, Value)>, BackendError> {
        match self {
            Self::Aws(config) => {
                let mut payload = Map::new();
                if let Some(max_retries) = config.max_retries {
                    payload.insert("max_retries".into(), json!(max_retries));
                }
                insert_non_empty(&mut payload, "region", Some(&config.region));
                insert_non_empty(&mut payload, "iam_endpoint", config.iam_endpoint.as_ref());
                insert_non_empty(&mut payload, "sts_endpoint", config.sts_endpoint.as_ref());

                let credentials =
                    required_secret(secrets, namespace, &config.credential_secret).await?;
                insert_non_empty(&mut payload, "access_key", credentials.get("access_key"));
                insert_non_empty(&mut payload, "secret_key", credentials.get("secret_key"));

                let mut requests = vec![("config/root".to_string(), Value::Object(payload))];
                if let Some(lease) = &config.lease_config {
                    requests.push((
                        "config/lease".to_string(),
                        json!({ "lease": lease.lease, "lease_max": lease.lease_max }),
                    ));
                }
                Ok(requests)
            }
            Self::Azure(config) => {
                let credentials =
                    required_secret(secrets, namespace, &config.credential_secret).await?;
                let mut payload = Map::new();
                for (key, field) in [("subscription-id", "subscription_id"), ("tenant-id", "tenant_id")] {
                    let value = credentials
                        .get(key)
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| {
                            BackendError::Config(format!(
                                "azure credential secret {} is missing {key}",
                                config.credential_secret
                            ))
                        })?;
                    payload.insert(field.into(), json!(value));
                }
                insert_non_empty(&mut payload, "client_id", credentials.get("client-id"));
                insert_non_empty(&mut payload, "client_secret", credentials.get("client-secret"));
                insert_non_empty(&mut payload, "environment", config.environment.as_ref());
                Ok(vec![("config".to_string(), Value::Object(payload))])
            }
            Self::Gcp(config) => {
                let mut payload = Map::new();
                insert_non_empty(&mut payload, "ttl", config.ttl.as_ref());
                insert_non_empty(&mut payload, "max_ttl", config.max_ttl.as_ref());
                let credentials =
                    required_secret(secrets, namespace, &config.credential_secret).await?;
                insert_non_empty(&mut payload, "credentials", credentials.get("sa.json"));
                Ok(vec![("config".to_string(), Value::Object(payload))])
            }
            Self::Database { connection, engine } => {
                let database_ref = engine.database_ref();
                let mut payload = Map::new();
                payload.insert("plugin_name".into(), json!(engine.plugin_name()));
                payload.insert("allowed_roles".into(), json!(engine.allowed_roles()));
                payload.insert("connection_url".into(), json!(database_ref.connection_url));

                if let Some(secret_name) = &database_ref.credential_secret {
                    let credentials = required_secret(secrets, namespace, secret_name).await?;
                    insert_non_empty(&mut payload, "username", credentials.get("username"));
                    insert_non_empty(&mut payload, "password", credentials.get("password"));
                }

                match engine {
                    DatabaseEngine::Mysql(config) | DatabaseEngine::Postgres(config) => {
                        if let Some(v) = config.max_open_connections {
                            payload.insert("max_open_connections".into(), json!(v));
                        }
                        if let Some(v) = config.max_idle_connections {
                            payload.insert("max_idle_connections".into(), json!(v));
                        }
                        insert_non_empty(
                            &mut payload,
                            "max_connection_lifetime",
                            config.max_connection_lifetime.as_ref(),
                        );
                    }
                    DatabaseEngine::Mongodb(config) => {
                        insert_non_empty(&mut payload, "write_concern", config.write_concern.as_ref());
                    }
                }

                Ok(vec![(format!("config/{connection}"), Value::Object(payload))])
            }
        }
    }
}

fn insert_non_empty(payload: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        payload.insert(key.to_string(), json!(v));
    }
}

async fn required_secret(
    secrets: &dyn SecretSource,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>, BackendError> {
    secrets
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| BackendError::Config(format!("secret {namespace}/{name} not found")))
}

/// A role kind provisioned in a Vault secrets engine
pub trait RoleSpec: ManagedResource {
    fn vault_ref(&self) -> &VaultRef;

    /// Mount path of the engine
    fn engine_path(&self) -> &str;

    fn engine_config(&self, cluster: Option<&str>) -> EngineConfig;

    /// Parameters of the role at the backend
    fn role_payload(&self, cluster: Option<&str>) -> Value;
}

impl RoleSpec for AwsRole {
    fn vault_ref(&self) -> &VaultRef {
        &self.spec.vault_ref
    }

    fn engine_path(&self) -> &str {
        &self.spec.path
    }

    fn engine_config(&self, _cluster: Option<&str>) -> EngineConfig {
        EngineConfig::Aws(self.spec.config.clone())
    }

    fn role_payload(&self, _cluster: Option<&str>) -> Value {
        let spec = &self.spec;
        let mut payload = Map::new();
        payload.insert("credential_type".into(), json!(spec.credential_type));
        if !spec.role_arns.is_empty() {
            payload.insert("role_arns".into(), json!(spec.role_arns));
        }
        if !spec.policy_arns.is_empty() {
            payload.insert("policy_arns".into(), json!(spec.policy_arns));
        }
        insert_non_empty(&mut payload, "policy_document", spec.policy_document.as_ref());
        insert_non_empty(&mut payload, "default_sts_ttl", spec.default_sts_ttl.as_ref());
        insert_non_empty(&mut payload, "max_sts_ttl", spec.max_sts_ttl.as_ref());
        Value::Object(payload)
    }
}

impl RoleSpec for AzureRole {
    fn vault_ref(&self) -> &VaultRef {
        &self.spec.vault_ref
    }

    fn engine_path(&self) -> &str {
        &self.spec.path
    }

    fn engine_config(&self, _cluster: Option<&str>) -> EngineConfig {
        EngineConfig::Azure(self.spec.config.clone())
    }

    fn role_payload(&self, _cluster: Option<&str>) -> Value {
        let spec = &self.spec;
        let mut payload = Map::new();
        insert_non_empty(&mut payload, "azure_roles", spec.azure_roles.as_ref());
        insert_non_empty(
            &mut payload,
            "application_object_id",
            spec.application_object_id.as_ref(),
        );
        insert_non_empty(&mut payload, "ttl", spec.ttl.as_ref());
        insert_non_empty(&mut payload, "max_ttl", spec.max_ttl.as_ref());
        Value::Object(payload)
    }
}

impl RoleSpec for GcpRole {
    fn vault_ref(&self) -> &VaultRef {
        &self.spec.vault_ref
    }

    fn engine_path(&self) -> &str {
        &self.spec.path
    }

    fn engine_config(&self, _cluster: Option<&str>) -> EngineConfig {
        EngineConfig::Gcp(self.spec.config.clone())
    }

    fn role_payload(&self, _cluster: Option<&str>) -> Value {
        let spec = &self.spec;
        let mut payload = Map::new();
        payload.insert("project".into(), json!(spec.project));
        payload.insert("bindings".into(), json!(spec.bindings));
        payload.insert("secret_type".into(), json!(spec.secret_type));
        if !spec.token_scopes.is_empty() {
            payload.insert("token_scopes".into(), json!(spec.token_scopes));
        }
        Value::Object(payload)
    }
}

impl DatabaseRole {
    /// Name of the database connection in Vault, scoped like role names
    pub fn connection_name(&self, cluster: Option<&str>) -> String {
        role_name(
            cluster,
            &self.namespace().unwrap_or_default(),
            &self.spec.database.database_ref().name,
        )
    }
}

impl RoleSpec for DatabaseRole {
    fn vault_ref(&self) -> &VaultRef {
        &self.spec.vault_ref
    }

    fn engine_path(&self) -> &str {
        &self.spec.path
    }

    fn engine_config(&self, cluster: Option<&str>) -> EngineConfig {
        EngineConfig::Database {
            connection: self.connection_name(cluster),
            engine: self.spec.database.clone(),
        }
    }

    fn role_payload(&self, cluster: Option<&str>) -> Value {
        let spec = &self.spec;
        let mut payload = Map::new();
        payload.insert("db_name".into(), json!(self.connection_name(cluster)));
        payload.insert("creation_statements".into(), json!(spec.creation_statements));
        for (key, statements) in [
            ("revocation_statements", &spec.revocation_statements),
            ("rollback_statements", &spec.rollback_statements),
            ("renew_statements", &spec.renew_statements),
        ] {
            if !statements.is_empty() {
                payload.insert(key.into(), json!(statements));
            }
        }
        insert_non_empty(&mut payload, "default_ttl", spec.default_ttl.as_ref());
        insert_non_empty(&mut payload, "max_ttl", spec.max_ttl.as_ref());
        Value::Object(payload)
    }
}

/// [`RoleBackend`] talking to Vault over HTTP
pub struct VaultRoleBackend {
    client: VaultClient,
    path: String,
    namespace: String,
    role_name: String,
    engine: EngineConfig,
    role_payload: Value,
    secrets: Arc<dyn SecretSource>,
}

impl std::fmt::Debug for VaultRoleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRoleBackend")
            .field("client", &self.client)
            .field("path", &self.path)
            .field("role_name", &self.role_name)
            .finish_non_exhaustive()
    }
}

impl VaultRoleBackend {
    fn role_path(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.path, self.engine.role_prefix())
    }
}

#[async_trait]
impl RoleBackend for VaultRoleBackend {
    async fn enable_engine(&self) -> Result<(), BackendError> {
        let mounts = self.client.list_mounts().await?;
        let mount_key = format!("{}/", self.path.trim_end_matches('/'));
        if mounts.contains_key(&mount_key) {
            debug!("{} secrets engine already enabled at {}", self.engine.engine_type(), self.path);
            return Ok(());
        }
        self.client
            .enable_secrets_engine(&self.path, self.engine.engine_type())
            .await
    }

    async fn write_config(&self) -> Result<(), BackendError> {
        let requests = self
            .engine
            .config_requests(&self.namespace, self.secrets.as_ref())
            .await?;
        for (sub_path, payload) in requests {
            self.client
                .write(&format!("{}/{sub_path}", self.path), &payload)
                .await?;
        }
        Ok(())
    }

    async fn create_or_update_role(&self) -> Result<(), BackendError> {
        self.client
            .write(&self.role_path(&self.role_name), &self.role_payload)
            .await
    }

    async fn delete_role(&self, name: &str) -> Result<(), BackendError> {
        self.client.delete(&self.role_path(name)).await
    }
}

/// Builds [`VaultRoleBackend`]s, reading the Vault token from the resource's namespace
pub struct VaultBackendFactory {
    secrets: Arc<dyn SecretSource>,
    cluster_name: Option<String>,
    request_timeout: Duration,
}

impl std::fmt::Debug for VaultBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackendFactory")
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

impl VaultBackendFactory {
    pub fn new(
        secrets: Arc<dyn SecretSource>,
        cluster_name: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            cluster_name,
            request_timeout,
        }
    }
}

#[async_trait]
impl<K: RoleSpec> RoleBackendFactory<K> for VaultBackendFactory {
    async fn backend_for(&self, obj: &K) -> Result<Box<dyn RoleBackend>, BackendError> {
        let namespace = obj.namespace().unwrap_or_default();
        let vault_ref = obj.vault_ref();

        let token_data = required_secret(self.secrets.as_ref(), &namespace, &vault_ref.token_secret).await?;
        let token = token_data.get(&vault_ref.token_key).cloned().ok_or_else(|| {
            BackendError::Config(format!(
                "secret {namespace}/{} has no key {}",
                vault_ref.token_secret, vault_ref.token_key
            ))
        })?;

        let client = VaultClient::new(
            &vault_ref.address,
            Some(token),
            vault_ref.ca_bundle.as_deref(),
            vault_ref.tls_skip_verify,
            self.request_timeout,
        )?;

        let cluster = self.cluster_name.as_deref();
        Ok(Box::new(VaultRoleBackend {
            client,
            path: obj.engine_path().trim_matches('/').to_string(),
            role_name: role_name(cluster, &namespace, &obj.name_any()),
            engine: obj.engine_config(cluster),
            role_payload: obj.role_payload(cluster),
            namespace,
            secrets: Arc::clone(&self.secrets),
        }))
    }
}
