//! Ensures a (database, collection) pair exists in the document store

use crate::events::{Events, ProvisioningEvent};
use crate::provisioning::{Flight, ResourceKey, ResourceRegistry};
use crate::storage::{DocumentStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Throughput requested for new collections unless configured otherwise
pub const DEFAULT_COLLECTION_THROUGHPUT: u32 = 1000;

#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    #[error("failed to ensure database {database}: {source}")]
    Database {
        database: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to ensure collection {database}/{collection}: {source}")]
    Collection {
        database: String,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("collection {database}/{collection} is not initialized after provisioning")]
    NotInitialized { database: String, collection: String },
}

impl ProvisioningError {
    /// The store error behind the failure, if there was one
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ProvisioningError::Database { source, .. }
            | ProvisioningError::Collection { source, .. } => Some(source),
            ProvisioningError::NotInitialized { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Throughput hint for new collections; `None` leaves it to the store
    pub collection_throughput: Option<u32>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            collection_throughput: Some(DEFAULT_COLLECTION_THROUGHPUT),
        }
    }
}

pub struct ResourceProvisioner {
    store: Arc<dyn DocumentStore>,
    registry: Arc<ResourceRegistry>,
    config: ProvisioningConfig,
    events: Events,
}

impl ResourceProvisioner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<ResourceRegistry>,
        config: ProvisioningConfig,
        events: Events,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Make sure the database and the collection exist
    ///
    /// Returns immediately once the collection has been confirmed in this
    /// process. Concurrent calls for the same key share one read/create.
    pub async fn ensure(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<(), ProvisioningError> {
        let collection_key = ResourceKey::collection(database_id, collection_id);
        if self.registry.is_initialized(&collection_key) {
            return Ok(());
        }

        self.ensure_database(database_id)
            .await
            .map_err(|source| ProvisioningError::Database {
                database: database_id.to_string(),
                source,
            })?;

        self.ensure_collection(database_id, collection_id)
            .await
            .map_err(|source| ProvisioningError::Collection {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
                source,
            })?;

        if !self.registry.is_initialized(&collection_key) {
            return Err(ProvisioningError::NotInitialized {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
            });
        }

        Ok(())
    }

    async fn ensure_database(&self, database_id: &str) -> Result<(), StoreError> {
        let key = ResourceKey::database(database_id);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let task_key = key.clone();
        let database_id = database_id.to_string();

        let flight = self
            .registry
            .begin_or_join(&key, move || async move {
                confirm_or_create(
                    task_key,
                    &events,
                    store.read_database(&database_id),
                    || store.create_database(&database_id),
                )
                .await
            })
            .await?;

        self.note_joined(flight, key);
        Ok(())
    }

    async fn ensure_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<(), StoreError> {
        let key = ResourceKey::collection(database_id, collection_id);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let task_key = key.clone();
        let database_id = database_id.to_string();
        let collection_id = collection_id.to_string();
        let throughput = self.config.collection_throughput;

        let flight = self
            .registry
            .begin_or_join(&key, move || async move {
                confirm_or_create(
                    task_key,
                    &events,
                    store.read_collection(&database_id, &collection_id),
                    || store.create_collection(&database_id, &collection_id, throughput),
                )
                .await
            })
            .await?;

        self.note_joined(flight, key);
        Ok(())
    }

    fn note_joined(&self, flight: Flight, key: ResourceKey) {
        if flight == Flight::Joined {
            self.events.emit(ProvisioningEvent::CreationJoined { key });
        }
    }
}

/// Read a resource and create it when the read reports it missing
///
/// A conflict on create means another writer got there first, which still
/// confirms the resource exists.
async fn confirm_or_create<R, T, C, CF, U>(
    key: ResourceKey,
    events: &Events,
    read: R,
    create: C,
) -> Result<(), StoreError>
where
    R: Future<Output = Result<T, StoreError>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<U, StoreError>>,
{
    match read.await {
        Ok(_) => {
            events.emit(ProvisioningEvent::ResourceFound { key });
            return Ok(());
        }
        Err(e) if e.is_not_found() => {
            events.emit(ProvisioningEvent::ResourceMissing { key: key.clone() });
        }
        Err(e) => {
            emit_failure(events, key, &e);
            return Err(e);
        }
    }

    match create().await {
        Ok(_) => {
            events.emit(ProvisioningEvent::ResourceCreated { key });
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            events.emit(ProvisioningEvent::ResourceCreatedElsewhere { key });
            Ok(())
        }
        Err(e) => {
            emit_failure(events, key, &e);
            Err(e)
        }
    }
}

fn emit_failure(events: &Events, key: ResourceKey, err: &StoreError) {
    events.emit(ProvisioningEvent::ProvisioningFailed {
        key,
        error: err.to_string(),
        advice: err.advice(),
    });
}
