//! Shared fakes for integration tests
//!
//! In-memory stand-ins for the Kubernetes API and the Vault backends, plus
//! builders wiring them into a dispatcher the way the runtime does.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde_json::json;

use vault_engine_controller::backend::{
    role_name, BackendError, HealthProbe, RoleBackend, RoleBackendFactory, RoleSpec,
    ServerTopology, TlsMaterial,
};
use vault_engine_controller::controller::backoff::ExponentialBackoff;
use vault_engine_controller::controller::{
    Dispatcher, FinalizerManager, FinalizerRegistry, MonitorRegistry, QueueKey,
    ReconcileStrategy, RoleStrategy, ServerStrategy, StatusReporter, WorkQueue,
};
use vault_engine_controller::crd::{AwsRole, ManagedResource, VaultServer, VaultStatus};
use vault_engine_controller::store::{ResourceStore, StoreError};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // The pact mock server may already have installed the ring provider
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub const FINALIZER_INTERVAL: Duration = Duration::from_secs(5);
pub const FINALIZER_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Resource store
// ---------------------------------------------------------------------------

/// API server and cache in one: objects are visible to `get_by_key` immediately
pub struct FakeStore<K> {
    objects: Mutex<BTreeMap<QueueKey, K>>,
    pub status_writes: AtomicUsize,
    pub finalizer_removals: AtomicUsize,
    /// Number of upcoming finalizer removals that fail
    pub failing_removals: AtomicU32,
}

impl<K: ManagedResource> FakeStore<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(BTreeMap::new()),
            status_writes: AtomicUsize::new(0),
            finalizer_removals: AtomicUsize::new(0),
            failing_removals: AtomicU32::new(0),
        })
    }

    pub fn insert(&self, obj: K) {
        self.objects
            .lock()
            .unwrap()
            .insert(QueueKey::from_object(&obj), obj);
    }

    pub fn remove(&self, key: &QueueKey) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &QueueKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn finalizer_removals(&self) -> usize {
        self.finalizer_removals.load(Ordering::SeqCst)
    }
}

fn bump_resource_version<K: ManagedResource>(obj: &mut K) {
    let next = obj
        .meta()
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj.meta_mut().resource_version = Some(next.to_string());
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for FakeStore<K> {
    fn get_by_key(&self, key: &QueueKey) -> Option<Arc<K>> {
        self.object(key).map(Arc::new)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.object(&QueueKey::new(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = QueueKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        *stored.status_mut() = obj.status().cloned();
        bump_resource_version(stored);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError> {
        let key = QueueKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let finalizers = stored.meta_mut().finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
            bump_resource_version(stored);
        }
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), StoreError> {
        self.finalizer_removals.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_removals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(format!("{namespace}/{name}")));
        }

        let key = QueueKey::new(namespace, name);
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key) else {
            return Ok(());
        };
        if let Some(finalizers) = stored.meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        bump_resource_version(stored);

        // The API server deletes a terminating object once its last finalizer is gone
        let terminating = stored.meta().deletion_timestamp.is_some();
        let no_finalizers = stored.finalizers().is_empty();
        if terminating && no_finalizers {
            objects.remove(&key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object builders
// ---------------------------------------------------------------------------

pub fn aws_role(namespace: &str, name: &str) -> AwsRole {
    let mut role: AwsRole = serde_json::from_value(json!({
        "apiVersion": "engine.kubevault.com/v1alpha1",
        "kind": "AWSRole",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "generation": 1,
            "resourceVersion": "1"
        },
        "spec": {
            "vaultRef": {"address": "https://vault.vault.svc:8200", "tokenSecret": "vault-token"},
            "config": {"credentialSecret": "aws-cred", "region": "us-east-1"},
            "credentialType": "iam_user",
            "policyArns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"]
        }
    }))
    .unwrap();
    role.meta_mut().uid = Some(format!("uid-{namespace}-{name}"));
    role
}

pub fn vault_server(namespace: &str, name: &str) -> VaultServer {
    serde_json::from_value(json!({
        "apiVersion": "engine.kubevault.com/v1alpha1",
        "kind": "VaultServer",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "generation": 3,
            "resourceVersion": "1",
            "uid": format!("uid-{namespace}-{name}")
        },
        "spec": {}
    }))
    .unwrap()
}

pub fn with_finalizers<K: ManagedResource>(mut obj: K, finalizers: &[&str]) -> K {
    obj.meta_mut().finalizers = Some(finalizers.iter().map(ToString::to_string).collect());
    obj
}

/// Mark `obj` for deletion
pub fn deleting<K: ManagedResource>(mut obj: K) -> K {
    let timestamp: Time = serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap();
    obj.meta_mut().deletion_timestamp = Some(timestamp);
    obj
}

// ---------------------------------------------------------------------------
// Role backend
// ---------------------------------------------------------------------------

/// Calls made against the fake Vault, shared by every backend the factory builds
#[derive(Debug, Default)]
pub struct FakeVault {
    calls: Mutex<Vec<String>>,
    /// Number of upcoming `write_config` calls that fail
    pub failing_configs: AtomicU32,
    /// Number of upcoming `delete_role` calls that fail; `u32::MAX` fails forever
    pub failing_deletes: AtomicU32,
}

impl FakeVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn should_fail(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

struct FakeRoleBackend {
    vault: Arc<FakeVault>,
    path: String,
    role: String,
}

#[async_trait]
impl RoleBackend for FakeRoleBackend {
    async fn enable_engine(&self) -> Result<(), BackendError> {
        self.vault.record(format!("enable {}", self.path));
        Ok(())
    }

    async fn write_config(&self) -> Result<(), BackendError> {
        self.vault.record(format!("config {}", self.path));
        if FakeVault::should_fail(&self.vault.failing_configs) {
            return Err(BackendError::Status {
                code: 500,
                body: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn create_or_update_role(&self) -> Result<(), BackendError> {
        self.vault.record(format!("role {}/roles/{}", self.path, self.role));
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), BackendError> {
        self.vault.record(format!("delete {}/roles/{name}", self.path));
        if FakeVault::should_fail(&self.vault.failing_deletes) {
            return Err(BackendError::Status {
                code: 503,
                body: "vault is sealed".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeBackendFactory {
    pub vault: Arc<FakeVault>,
}

#[async_trait]
impl<K: RoleSpec> RoleBackendFactory<K> for FakeBackendFactory {
    async fn backend_for(&self, obj: &K) -> Result<Box<dyn RoleBackend>, BackendError> {
        Ok(Box::new(FakeRoleBackend {
            vault: Arc::clone(&self.vault),
            path: obj.engine_path().to_string(),
            role: role_name(None, &obj.namespace().unwrap_or_default(), &obj.name_any()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Server topology and health
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeTopology {
    calls: Mutex<Vec<String>>,
}

impl FakeTopology {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerTopology for FakeTopology {
    async fn ensure_tls(&self, server: &VaultServer) -> Result<TlsMaterial, BackendError> {
        self.calls.lock().unwrap().push("tls".to_string());
        Ok(TlsMaterial {
            secret_name: format!("{}-vault-tls", server.name_any()),
            ca_pem: Some("ca".to_string()),
        })
    }

    async fn ensure_config(&self, _server: &VaultServer) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push("config".to_string());
        Ok(())
    }

    async fn ensure_deployed(&self, _server: &VaultServer) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push("deploy".to_string());
        Ok(())
    }

    async fn ensure_binding(
        &self,
        _server: &VaultServer,
        _tls: &TlsMaterial,
    ) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push("binding".to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeProbe {
    pub probes: AtomicUsize,
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _server: &VaultServer) -> Result<VaultStatus, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(VaultStatus {
            initialized: true,
            sealed: false,
            standby: false,
            version: Some("1.2.0".to_string()),
            last_checked: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

/// One kind's engine over fakes
pub struct Harness<K: ManagedResource> {
    pub store: Arc<FakeStore<K>>,
    pub queue: WorkQueue,
    pub dispatcher: Arc<Dispatcher<K>>,
    pub finalizers: FinalizerManager<K>,
    pub monitors: MonitorRegistry,
}

impl<K: ManagedResource> Harness<K> {
    pub fn new(strategy: impl FnOnce(StatusReporter<K>) -> Arc<dyn ReconcileStrategy<K>>) -> Self {
        Self::with_max_requeues(5, strategy)
    }

    pub fn with_max_requeues(
        max_num_requeues: u32,
        strategy: impl FnOnce(StatusReporter<K>) -> Arc<dyn ReconcileStrategy<K>>,
    ) -> Self {
        let store = FakeStore::<K>::new();
        let dyn_store: Arc<dyn ResourceStore<K>> = store.clone();
        let strategy = strategy(StatusReporter::new(Arc::clone(&dyn_store), 5));
        let queue = WorkQueue::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ));
        let monitors = MonitorRegistry::new();
        let finalizers = FinalizerManager::new(
            Arc::clone(&dyn_store),
            Arc::clone(&strategy),
            FinalizerRegistry::new(),
            FINALIZER_INTERVAL,
            FINALIZER_TIMEOUT,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            dyn_store,
            strategy,
            finalizers.clone(),
            monitors.clone(),
            max_num_requeues,
        ));
        Self {
            store,
            queue,
            dispatcher,
            finalizers,
            monitors,
        }
    }
}

pub fn role_harness(vault: &Arc<FakeVault>) -> Harness<AwsRole> {
    role_harness_with_max_requeues(vault, 5)
}

pub fn role_harness_with_max_requeues(
    vault: &Arc<FakeVault>,
    max_num_requeues: u32,
) -> Harness<AwsRole> {
    let factory = Arc::new(FakeBackendFactory {
        vault: Arc::clone(vault),
    });
    Harness::with_max_requeues(max_num_requeues, move |reporter| {
        Arc::new(RoleStrategy::new(factory, reporter, None)) as Arc<dyn ReconcileStrategy<AwsRole>>
    })
}

pub fn server_harness(
    topology: Arc<FakeTopology>,
    probe: Arc<FakeProbe>,
) -> Harness<VaultServer> {
    Harness::new(move |reporter| {
        Arc::new(ServerStrategy::new(
            topology,
            probe,
            reporter,
            Duration::from_secs(10),
        )) as Arc<dyn ReconcileStrategy<VaultServer>>
    })
}

/// Advance (paused) time until `done` holds, giving up after `limit`
pub async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while !done() {
        if waited >= limit {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    true
}
