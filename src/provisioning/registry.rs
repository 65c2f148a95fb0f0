//! Process-wide record of which resources are known to exist
//!
//! Each key is either not initialized, being created, or confirmed. Callers
//! that arrive while a creation is in flight await the same attempt instead
//! of starting their own.

use crate::storage::StoreError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A database, or a collection within a database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Database(String),
    Collection {
        database_id: String,
        collection_id: String,
    },
}

impl ResourceKey {
    pub fn database(database_id: &str) -> Self {
        ResourceKey::Database(database_id.to_string())
    }

    pub fn collection(database_id: &str, collection_id: &str) -> Self {
        ResourceKey::Collection {
            database_id: database_id.to_string(),
            collection_id: collection_id.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Database(id) => write!(f, "database {}", id),
            ResourceKey::Collection {
                database_id,
                collection_id,
            } => write!(f, "collection {}/{}", database_id, collection_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceStatus {
    #[default]
    NotInitialized,
    Initializing,
    Initialized,
}

/// How a `begin_or_join` call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// The key was already confirmed; nothing ran
    AlreadyInitialized,
    /// This caller started the creation
    Led,
    /// This caller awaited a creation another caller started
    Joined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub initialized: usize,
    pub initializing: usize,
    pub in_flight: usize,
}

type PendingCreation = Shared<BoxFuture<'static, Result<(), StoreError>>>;

#[derive(Default)]
struct RegistryState {
    statuses: HashMap<ResourceKey, ResourceStatus>,
    pending: HashMap<ResourceKey, PendingCreation>,
}

impl RegistryState {
    fn status(&self, key: &ResourceKey) -> ResourceStatus {
        self.statuses.get(key).copied().unwrap_or_default()
    }

    /// Record the outcome of a creation and drop its pending entry
    fn settle(&mut self, key: &ResourceKey, result: &Result<(), StoreError>) {
        self.pending.remove(key);
        match result {
            Ok(()) => {
                self.statuses.insert(key.clone(), ResourceStatus::Initialized);
            }
            Err(_) => {
                if self.status(key) != ResourceStatus::Initialized {
                    self.statuses.insert(key.clone(), ResourceStatus::NotInitialized);
                }
            }
        }
    }
}

/// Memoized resource status with single-flight creation
///
/// One mutex guards both the status map and the pending creations, so a
/// reader never sees a key marked initializing without its pending entry.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, key: &ResourceKey) -> ResourceStatus {
        self.state.lock().status(key)
    }

    pub fn is_initialized(&self, key: &ResourceKey) -> bool {
        self.status(key) == ResourceStatus::Initialized
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        let mut stats = RegistryStats {
            in_flight: state.pending.len(),
            ..RegistryStats::default()
        };
        for status in state.statuses.values() {
            match status {
                ResourceStatus::Initialized => stats.initialized += 1,
                ResourceStatus::Initializing => stats.initializing += 1,
                ResourceStatus::NotInitialized => {}
            }
        }
        stats
    }

    /// Run `factory` for `key` unless the key is confirmed or already in flight
    ///
    /// The created future is spawned, so it runs to completion and settles the
    /// registry even if every caller awaiting it is dropped. An `Ok` outcome
    /// marks the key initialized; an error leaves it retryable and is handed
    /// to every caller that joined the attempt.
    pub async fn begin_or_join<F, Fut>(
        &self,
        key: &ResourceKey,
        factory: F,
    ) -> Result<Flight, StoreError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let (creation, flight) = {
            let mut state = self.state.lock();

            if state.status(key) == ResourceStatus::Initialized {
                return Ok(Flight::AlreadyInitialized);
            }

            match state.pending.get(key).cloned() {
                Some(pending) => (pending, Flight::Joined),
                None => {
                    let creation = self.spawn_creation(key.clone(), factory());
                    state.pending.insert(key.clone(), creation.clone());
                    state
                        .statuses
                        .insert(key.clone(), ResourceStatus::Initializing);
                    (creation, Flight::Led)
                }
            }
        };

        creation.await.map(|()| flight)
    }

    fn spawn_creation<Fut>(&self, key: ResourceKey, fut: Fut) -> PendingCreation
    where
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        // The task blocks on the registry lock until the caller has installed
        // the pending entry, so settling always finds it
        let task_state = Arc::clone(&self.state);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = fut.await;
            task_state.lock().settle(&task_key, &result);
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    // The task panicked or was cancelled before settling
                    let err = StoreError::Interrupted(format!("creation of {}: {}", key, e));
                    state.lock().settle(&key, &Err(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_factory(
        calls: &Arc<AtomicUsize>,
        result: Result<(), StoreError>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<(), StoreError>> + Send {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                result
            }
            .boxed()
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ResourceKey::database("db1").to_string(), "database db1");
        assert_eq!(
            ResourceKey::collection("db1", "coll1").to_string(),
            "collection db1/coll1"
        );
        assert_ne!(ResourceKey::database("db1"), ResourceKey::collection("db1", ""));
    }

    #[tokio::test]
    async fn test_single_flight() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::database("db1");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = registry.clone();
            let key = key.clone();
            let factory = counting_factory(&calls, Ok(()));
            handles.push(tokio::spawn(async move {
                registry.begin_or_join(&key, factory).await
            }));
        }

        let mut led = 0;
        for handle in handles {
            let flight = handle.await.unwrap().unwrap();
            if flight == Flight::Led {
                led += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(led, 1);
        assert!(registry.is_initialized(&key));
        assert_eq!(registry.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_initialized_skips_factory() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::collection("db1", "coll1");
        let calls = Arc::new(AtomicUsize::new(0));

        registry
            .begin_or_join(&key, counting_factory(&calls, Ok(())))
            .await
            .unwrap();
        let flight = registry
            .begin_or_join(&key, counting_factory(&calls, Ok(())))
            .await
            .unwrap();

        assert_eq!(flight, Flight::AlreadyInitialized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_poison() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::database("db1");
        let calls = Arc::new(AtomicUsize::new(0));

        let err = registry
            .begin_or_join(
                &key,
                counting_factory(&calls, Err(StoreError::Database("boom".into()))),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Database("boom".into()));
        assert_eq!(registry.status(&key), ResourceStatus::NotInitialized);
        assert_eq!(registry.stats().in_flight, 0);

        let flight = registry
            .begin_or_join(&key, counting_factory(&calls, Ok(())))
            .await
            .unwrap();
        assert_eq!(flight, Flight::Led);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(registry.is_initialized(&key));
    }

    #[tokio::test]
    async fn test_joined_callers_share_failure() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::database("db1");
        let calls = Arc::new(AtomicUsize::new(0));
        let limited = StoreError::RateLimited {
            retry_after: Duration::from_millis(500),
        };

        let (first, second) = tokio::join!(
            registry.begin_or_join(&key, counting_factory(&calls, Err(limited.clone()))),
            registry.begin_or_join(&key, counting_factory(&calls, Ok(()))),
        );

        assert_eq!(first, Err(limited.clone()));
        assert_eq!(second, Err(limited));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_while_in_flight() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::database("db1");
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let task = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move {
                registry
                    .begin_or_join(&key, move || async move {
                        let _ = released.await;
                        Ok::<(), StoreError>(())
                    })
                    .await
            })
        };

        while registry.status(&key) != ResourceStatus::Initializing {
            tokio::task::yield_now().await;
        }
        let stats = registry.stats();
        assert_eq!(stats.initializing, 1);
        assert_eq!(stats.in_flight, 1);

        release.send(()).unwrap();
        assert_eq!(task.await.unwrap(), Ok(Flight::Led));
        assert_eq!(registry.status(&key), ResourceStatus::Initialized);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_settles() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::collection("db1", "coll1");
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let caller = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move {
                registry
                    .begin_or_join(&key, move || async move {
                        let _ = released.await;
                        Ok::<(), StoreError>(())
                    })
                    .await
            })
        };

        while registry.status(&key) != ResourceStatus::Initializing {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_initialized(&key) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_status_is_monotonic() {
        let registry = ResourceRegistry::new();
        let key = ResourceKey::database("db1");

        registry.begin_or_join(&key, || async { Ok::<(), StoreError>(()) }).await.unwrap();
        assert!(registry.is_initialized(&key));

        // A late failure for a confirmed key cannot demote it
        registry
            .state
            .lock()
            .settle(&key, &Err(StoreError::Database("late".into())));
        assert!(registry.is_initialized(&key));
    }
}
