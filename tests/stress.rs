//! Stress tests for permgate
//!
//! Many callers against few keys, and many keys at once, verifying that
//! single-flight holds and that the hot paths stay cheap.

use permgate::auth::{permission_id, PermissionMode, TokenSigner};
use permgate::events::Events;
use permgate::gateway::{cache_key, DEFAULT_VAULT_URL};
use permgate::service::{Permgate, PermgateConfig};
use permgate::storage::{MemoryDocumentStore, MemorySecretStore, StoreOperation};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HOUR: Duration = Duration::from_secs(3600);

fn setup(latency: Duration) -> (Arc<MemoryDocumentStore>, Arc<MemorySecretStore>, Permgate) {
    let documents =
        Arc::new(MemoryDocumentStore::new(TokenSigner::ephemeral()).with_latency(latency));
    let secrets = Arc::new(MemorySecretStore::new());
    let permgate = Permgate::new(
        documents.clone(),
        secrets.clone(),
        PermgateConfig::default(),
        Events::new(),
    );
    (documents, secrets, permgate)
}

/// Many collections, many callers per collection: one create each
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_keys_single_flight() {
    let (documents, _, permgate) = setup(Duration::from_millis(5));

    let mut handles = Vec::new();
    for coll in 0..50 {
        for _ in 0..20 {
            let provisioner = permgate.provisioner().clone();
            handles.push(tokio::spawn(async move {
                provisioner.ensure("db1", &format!("coll{}", coll)).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(documents.calls(StoreOperation::CreateDatabase), 1);
    assert_eq!(documents.calls(StoreOperation::CreateCollection), 50);

    let stats = permgate.registry().stats();
    assert_eq!(stats.initialized, 51);
    assert_eq!(stats.initializing, 0);
    assert_eq!(stats.in_flight, 0);
}

/// Many users requesting tokens for the same collection at once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_users_one_collection() {
    let (documents, secrets, permgate) = setup(Duration::from_millis(1));

    let mut handles = Vec::new();
    for user in 0..200 {
        let gateway = permgate.gateway().clone();
        handles.push(tokio::spawn(async move {
            gateway
                .get_token("db1", "coll1", &format!("user{}", user), PermissionMode::Read, HOUR)
                .await
        }));
    }

    let mut tokens = HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap().unwrap());
    }

    assert_eq!(tokens.len(), 200);
    assert_eq!(documents.calls(StoreOperation::CreateCollection), 1);
    assert_eq!(documents.calls(StoreOperation::CreateUser), 200);
    assert_eq!(documents.calls(StoreOperation::CreatePermission), 200);
    assert_eq!(secrets.calls(StoreOperation::SetSecret), 200);
    for user in [0, 99, 199] {
        let id = permission_id("db1", &format!("user{}", user), PermissionMode::Read);
        assert_eq!(documents.permission_ids("db1", &format!("user{}", user)), vec![id]);
    }
}

/// Repeated requests are served from the cache without touching the document store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_hits_under_load() {
    let (documents, secrets, permgate) = setup(Duration::ZERO);
    let gateway = permgate.gateway();

    let first = gateway
        .get_token("db1", "coll1", "userA", PermissionMode::All, HOUR)
        .await
        .unwrap();
    let reads_before = documents.calls(StoreOperation::ReadUser);

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .get_token("db1", "coll1", "userA", PermissionMode::All, HOUR)
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), first);
    }

    assert_eq!(documents.calls(StoreOperation::ReadUser), reads_before);
    assert_eq!(secrets.calls(StoreOperation::SetSecret), 1);
    assert_eq!(secrets.calls(StoreOperation::GetSecret), 1001);
    assert!(secrets
        .get(DEFAULT_VAULT_URL, &cache_key("db1", "coll1", "userA"))
        .is_some());
}

/// Key derivation stays cheap and collision free over many inputs
#[test]
fn test_cache_key_derivation_at_scale() {
    let start = Instant::now();
    let mut keys = HashSet::new();

    for db in 0..10 {
        for coll in 0..100 {
            for user in 0..100 {
                keys.insert(cache_key(
                    &format!("db{}", db),
                    &format!("coll{}", coll),
                    &format!("user{}", user),
                ));
            }
        }
    }

    let elapsed = start.elapsed();
    assert_eq!(keys.len(), 100_000);
    assert!(
        elapsed < Duration::from_secs(10),
        "100k cache keys took {:?}",
        elapsed
    );
}
