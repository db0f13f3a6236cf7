//! Dispatcher routing, status reporting and retry policy over in-memory fakes

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    aws_role, deleting, role_harness, role_harness_with_max_requeues, server_harness,
    vault_server, wait_until, with_finalizers, FakeProbe, FakeTopology, FakeVault,
};
use vault_engine_controller::constants::{
    CONDITION_AVAILABLE, CONDITION_FAILURE, CONDITION_TRUE, FINALIZER, PHASE_SUCCESS,
};
use vault_engine_controller::controller::{resource_id, QueueKey};
use vault_engine_controller::crd::{AwsRole, VaultServer};

fn condition_types(role: &AwsRole) -> Vec<String> {
    role.status
        .as_ref()
        .map(|s| s.conditions.iter().map(|c| c.r#type.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_failed_config_step_reports_failure_then_recovers() {
    let vault = FakeVault::new();
    vault
        .failing_configs
        .store(1, std::sync::atomic::Ordering::SeqCst);
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(aws_role("ns", "foo"));

    // First pass: config write fails
    let err = harness.dispatcher.sync(&key).await.unwrap_err();
    assert_eq!(err.reason(), Some("FailedToCreateConfig"));

    let role = harness.store.object(&key).unwrap();
    assert!(role.metadata.finalizers.as_ref().unwrap().contains(&FINALIZER.to_string()));
    let status = role.status.as_ref().unwrap();
    let failure = status
        .conditions
        .iter()
        .find(|c| c.r#type == CONDITION_FAILURE)
        .unwrap();
    assert_eq!(failure.status, CONDITION_TRUE);
    assert_eq!(failure.reason.as_deref(), Some("FailedToCreateConfig"));
    assert!(failure.message.as_deref().unwrap().contains("connection refused"));
    assert_eq!(status.phase, None);
    assert!(!vault.calls().iter().any(|c| c.starts_with("role ")));

    // Second pass: everything succeeds
    harness.dispatcher.sync(&key).await.unwrap();

    let role = harness.store.object(&key).unwrap();
    assert_eq!(condition_types(&role), vec![CONDITION_AVAILABLE.to_string()]);
    let status = role.status.as_ref().unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_SUCCESS));
    assert_eq!(status.conditions[0].reason.as_deref(), Some("Provisioned"));
    assert_eq!(status.observed_generation, role.metadata.generation);
    assert_eq!(
        vault.calls().last().map(String::as_str),
        Some("role aws/roles/k8s.-.ns.foo")
    );
}

#[tokio::test]
async fn test_reconcile_twice_is_idempotent() {
    let vault = FakeVault::new();
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(aws_role("ns", "foo"));

    harness.dispatcher.sync(&key).await.unwrap();
    let first_calls = vault.calls();
    let first_status = harness.store.object(&key).unwrap().status;
    let writes = harness.store.status_writes();

    harness.dispatcher.sync(&key).await.unwrap();
    let calls = vault.calls();

    // Same create-or-update requests again, no extra status write
    assert_eq!(calls[first_calls.len()..], first_calls[..]);
    assert_eq!(harness.store.object(&key).unwrap().status, first_status);
    assert_eq!(harness.store.status_writes(), writes);
}

#[tokio::test]
async fn test_observed_generation_tracks_new_generation() {
    let vault = FakeVault::new();
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(aws_role("ns", "foo"));
    harness.dispatcher.sync(&key).await.unwrap();

    let mut role = harness.store.object(&key).unwrap();
    role.metadata.generation = Some(2);
    harness.store.insert(role);
    harness.dispatcher.sync(&key).await.unwrap();

    let role = harness.store.object(&key).unwrap();
    assert_eq!(role.status.unwrap().observed_generation, Some(2));
}

#[tokio::test]
async fn test_deletion_without_finalizer_starts_nothing() {
    let vault = FakeVault::new();
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(deleting(aws_role("ns", "foo")));

    harness.dispatcher.sync(&key).await.unwrap();

    assert!(harness.finalizers.registry().is_empty());
    assert!(harness.monitors.is_empty());
    assert!(vault.calls().is_empty());
    assert_eq!(harness.store.status_writes(), 0);
    // Finalizer is not added to an object that is going away
    assert!(harness.store.object(&key).unwrap().metadata.finalizers.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deletion_with_finalizer_runs_cleanup_once() {
    let vault = FakeVault::new();
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness
        .store
        .insert(deleting(with_finalizers(aws_role("ns", "foo"), &[FINALIZER])));

    harness.dispatcher.sync(&key).await.unwrap();
    // A second notification while finalizing does not start another task
    harness.dispatcher.sync(&key).await.unwrap();

    let store = Arc::clone(&harness.store);
    assert!(wait_until(Duration::from_secs(5), || store.object(&key).is_none()).await);
    assert_eq!(vault.calls(), vec!["delete aws/roles/k8s.-.ns.foo".to_string()]);
    assert!(
        wait_until(Duration::from_secs(1), || harness.finalizers.registry().is_empty()).await
    );
}

#[tokio::test]
async fn test_monitor_started_after_success_and_released_when_object_disappears() {
    let topology = Arc::new(FakeTopology::default());
    let probe = Arc::new(FakeProbe::default());
    let harness = server_harness(Arc::clone(&topology), probe);
    let key = QueueKey::new("ns", "vault");
    let id = resource_id::<VaultServer>(&key);
    harness.store.insert(vault_server("ns", "vault"));

    harness.dispatcher.sync(&key).await.unwrap();
    assert_eq!(topology.calls(), vec!["tls", "config", "deploy", "binding"]);
    assert!(harness.monitors.is_active(&id));

    let server = harness.store.object(&key).unwrap();
    assert_eq!(server.status.unwrap().common.observed_generation, Some(3));

    // Reconciling again keeps the single monitor
    harness.dispatcher.sync(&key).await.unwrap();
    assert_eq!(harness.monitors.len(), 1);

    harness.store.remove(&key);
    harness.dispatcher.sync(&key).await.unwrap();
    assert!(!harness.monitors.is_active(&id));
}

#[tokio::test(start_paused = true)]
async fn test_failing_key_is_requeued_then_dropped() {
    let vault = FakeVault::new();
    vault
        .failing_configs
        .store(u32::MAX, std::sync::atomic::Ordering::SeqCst);
    let harness = role_harness_with_max_requeues(&vault, 2);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(aws_role("ns", "foo"));
    harness.queue.add(key.clone());

    assert!(harness.dispatcher.process_next().await);
    assert_eq!(harness.queue.num_requeues(&key), 1);

    assert!(harness.dispatcher.process_next().await);
    assert_eq!(harness.queue.num_requeues(&key), 2);

    // Budget exhausted: dropped and forgotten, not re-added
    assert!(harness.dispatcher.process_next().await);
    assert_eq!(harness.queue.num_requeues(&key), 0);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(harness.queue.is_empty());

    let configs = vault.calls().iter().filter(|c| c.starts_with("config")).count();
    assert_eq!(configs, 3);
}

#[tokio::test]
async fn test_success_forgets_failures() {
    let vault = FakeVault::new();
    vault
        .failing_configs
        .store(1, std::sync::atomic::Ordering::SeqCst);
    let harness = role_harness(&vault);
    let key = QueueKey::new("ns", "foo");
    harness.store.insert(aws_role("ns", "foo"));
    harness.queue.add(key.clone());

    assert!(harness.dispatcher.process_next().await);
    assert_eq!(harness.queue.num_requeues(&key), 1);

    // The rate-limited re-add lands after a few milliseconds
    assert!(harness.dispatcher.process_next().await);
    assert_eq!(harness.queue.num_requeues(&key), 0);
}

#[tokio::test]
async fn test_run_returns_after_shutdown() {
    let vault = FakeVault::new();
    let harness = role_harness(&vault);
    harness.store.insert(aws_role("ns", "foo"));
    harness.queue.add(QueueKey::new("ns", "foo"));

    let run = tokio::spawn(Arc::clone(&harness.dispatcher).run(2));
    let store = Arc::clone(&harness.store);
    assert!(
        wait_until(Duration::from_secs(5), || {
            store
                .object(&QueueKey::new("ns", "foo"))
                .and_then(|r| r.status)
                .is_some_and(|s| s.phase.is_some())
        })
        .await
    );

    harness.queue.shut_down();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
}
