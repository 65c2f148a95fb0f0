//! Resilience tests for permgate
//!
//! These tests verify behavior under failure conditions like:
//! - Store failures during provisioning and issuance
//! - Rate limiting from either store
//! - Callers dropped while a creation is in flight
//! - Concurrent mode switches for the same user

use permgate::auth::{PermissionId, PermissionMode, TokenSigner};
use permgate::events::{Events, RecordingSink};
use permgate::gateway::{cache_key, GatewayError, DEFAULT_VAULT_URL};
use permgate::issuer::IssueError;
use permgate::provisioning::{ProvisioningError, ResourceKey, ResourceStatus};
use permgate::service::{Permgate, PermgateConfig};
use permgate::storage::{MemoryDocumentStore, MemorySecretStore, StoreError, StoreOperation};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const HOUR: Duration = Duration::from_secs(3600);

fn setup(
    documents: MemoryDocumentStore,
) -> (Arc<MemoryDocumentStore>, Arc<MemorySecretStore>, Arc<RecordingSink>, Permgate) {
    let documents = Arc::new(documents);
    let secrets = Arc::new(MemorySecretStore::new());
    let sink = Arc::new(RecordingSink::new());
    let permgate = Permgate::new(
        documents.clone(),
        secrets.clone(),
        PermgateConfig::default(),
        Events::with_sink(sink.clone()),
    );
    (documents, secrets, sink, permgate)
}

/// A failed creation leaves the key retryable
#[tokio::test]
async fn test_failed_creation_is_retried() {
    let (documents, _, _, permgate) = setup(MemoryDocumentStore::default());
    documents.fail_next(
        StoreOperation::CreateCollection,
        StoreError::Database("connection reset".into()),
    );

    let err = permgate.provisioner().ensure("db1", "coll1").await.unwrap_err();
    assert!(matches!(err, ProvisioningError::Collection { .. }));
    assert_eq!(
        permgate
            .registry()
            .status(&ResourceKey::collection("db1", "coll1")),
        ResourceStatus::NotInitialized
    );

    permgate.provisioner().ensure("db1", "coll1").await.unwrap();
    assert!(documents.has_collection("db1", "coll1"));
    assert_eq!(documents.calls(StoreOperation::CreateCollection), 2);
    // The database was confirmed the first time and not touched again
    assert_eq!(documents.calls(StoreOperation::ReadDatabase), 1);
}

/// Rate limiting surfaces with its retry hint and is not retried
#[tokio::test]
async fn test_rate_limit_is_surfaced_once() {
    let (documents, _, sink, permgate) = setup(MemoryDocumentStore::default());
    permgate.provisioner().ensure("db1", "coll1").await.unwrap();

    documents.fail_next(
        StoreOperation::ReadUser,
        StoreError::RateLimited {
            retry_after: Duration::from_millis(1500),
        },
    );

    let err = permgate
        .gateway()
        .get_token("db1", "coll1", "userA", PermissionMode::Read, HOUR)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Issue(IssueError::Principal { .. })));
    assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
    assert_eq!(documents.calls(StoreOperation::ReadUser), 1);
    assert_eq!(documents.calls(StoreOperation::CreateUser), 0);
    assert_eq!(sink.count("issue_failed"), 1);
}

/// A caller dropped mid-creation does not abort the creation
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_caller_does_not_abort_creation() {
    let (documents, _, _, permgate) = setup(
        MemoryDocumentStore::new(TokenSigner::ephemeral()).with_latency(Duration::from_millis(50)),
    );
    let key = ResourceKey::database("db1");

    let caller = {
        let provisioner = permgate.provisioner().clone();
        tokio::spawn(async move { provisioner.ensure("db1", "coll1").await })
    };

    // Let the database creation get under way, then drop the caller
    timeout(Duration::from_secs(5), async {
        while permgate.registry().status(&key) != ResourceStatus::Initializing {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    caller.abort();
    let _ = caller.await;

    timeout(Duration::from_secs(5), async {
        while !permgate.registry().is_initialized(&key) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(documents.has_database("db1"));

    // The next caller picks up from the confirmed database
    permgate.provisioner().ensure("db1", "coll1").await.unwrap();
    assert_eq!(documents.calls(StoreOperation::CreateDatabase), 1);
    assert!(documents.has_collection("db1", "coll1"));
}

/// A failed cache write fails the request, and the next request reissues
#[tokio::test]
async fn test_secret_write_failure() {
    let (documents, secrets, _, permgate) = setup(MemoryDocumentStore::default());
    secrets.fail_next(
        StoreOperation::SetSecret,
        StoreError::Forbidden("vault is read only".into()),
    );

    let err = permgate
        .gateway()
        .get_token("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Secret { .. }));
    assert!(secrets
        .get(DEFAULT_VAULT_URL, &cache_key("db1", "coll1", "userA"))
        .is_none());

    permgate
        .gateway()
        .get_token("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap();
    // The permission survived the first attempt and was read, not recreated
    assert_eq!(documents.calls(StoreOperation::CreatePermission), 1);
    assert_eq!(documents.calls(StoreOperation::ReadPermission), 1);
}

/// A failed delete during a mode switch keeps the old permission
#[tokio::test]
async fn test_delete_failure_during_mode_switch() {
    let (documents, _, _, permgate) = setup(MemoryDocumentStore::default());
    let issuer = permgate.issuer();

    issuer
        .get_or_create_permission("db1", "coll1", "userA", PermissionMode::Read, HOUR)
        .await
        .unwrap();

    documents.fail_next(
        StoreOperation::DeletePermission,
        StoreError::Database("timeout".into()),
    );
    let err = issuer
        .get_or_create_permission("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap_err();

    match &err {
        IssueError::DeletePermission { permission_id, .. } => {
            assert_eq!(permission_id, &PermissionId::from_raw("db1-userA-READ"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        documents.permission_ids("db1", "userA"),
        vec![PermissionId::from_raw("db1-userA-READ")]
    );

    issuer
        .get_or_create_permission("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap();
    assert_eq!(
        documents.permission_ids("db1", "userA"),
        vec![PermissionId::from_raw("db1-userA-ALL")]
    );
}

/// Racing mode switches leave exactly one permission on the collection
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mode_switches() {
    let (documents, _, _, permgate) = setup(
        MemoryDocumentStore::new(TokenSigner::ephemeral()).with_latency(Duration::from_millis(2)),
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        let issuer = permgate.issuer().clone();
        let mode = if i % 2 == 0 {
            PermissionMode::Read
        } else {
            PermissionMode::All
        };
        handles.push(tokio::spawn(async move {
            issuer
                .get_or_create_permission("db1", "coll1", "userA", mode, HOUR)
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            // Losing the race twice is allowed to fail
            Err(IssueError::PermissionConflict { .. }) => {}
            Err(e) => panic!("unexpected error {}", e),
        }
    }

    assert!(succeeded >= 1);
    assert_eq!(documents.permission_ids("db1", "userA").len(), 1);
    assert_eq!(documents.calls(StoreOperation::CreateDatabase), 1);
    assert_eq!(documents.calls(StoreOperation::CreateCollection), 1);
}

/// A vault outage on read is fatal, not a cache miss
#[tokio::test]
async fn test_secret_read_failure_skips_issuer() {
    let (documents, secrets, _, permgate) = setup(MemoryDocumentStore::default());
    secrets.fail_next(
        StoreOperation::GetSecret,
        StoreError::Database("vault unreachable".into()),
    );

    let err = permgate
        .gateway()
        .get_token("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "secret_store");
    assert_eq!(documents.calls(StoreOperation::ReadDatabase), 0);
}
