//! Storage backends for permgate
//!
//! - Postgres: durable document store and secret store
//! - Memory: in-process stores for development and tests

mod memory;
mod postgres;
mod resources;

pub use memory::{MemoryDocumentStore, MemorySecretStore, StoreOperation};
pub use postgres::{PostgresConfig, PostgresStore, StoreCounts};
pub use resources::{
    validate_resource_id, CachedSecret, Collection, Database, Permission, PermissionRequest,
    Principal,
};
pub(crate) use resources::expiry_after;

use crate::auth::PermissionId;
pub use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Storage errors
///
/// Not-found, conflict and rate limiting are distinct outcomes that callers
/// act on. Everything else is fatal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("entity too large: {0}")]
    EntityTooLarge(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation interrupted: {0}")]
    Interrupted(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Retry hint carried by a rate-limited response
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "conflict",
            StoreError::RateLimited { .. } => "rate_limited",
            StoreError::BadRequest(_) => "bad_request",
            StoreError::Forbidden(_) => "forbidden",
            StoreError::EntityTooLarge(_) => "entity_too_large",
            StoreError::Database(_) => "database",
            StoreError::Serialization(_) => "serialization",
            StoreError::Interrupted(_) => "interrupted",
        }
    }

    /// What the error usually means for whoever operates the store
    pub fn advice(&self) -> Option<&'static str> {
        match self {
            StoreError::RateLimited { .. } => Some(
                "the request rate exceeded the store's quota; wait for the retry-after hint before retrying",
            ),
            StoreError::BadRequest(_) => Some(
                "the store rejected the request; an id is likely missing or contains reserved characters",
            ),
            StoreError::Forbidden(_) => Some(
                "the store refused the write; the target collection is likely full",
            ),
            StoreError::Conflict(_) => Some("a resource with the same id already exists"),
            StoreError::EntityTooLarge(_) => Some(
                "the resource exceeds the store's maximum entity size",
            ),
            _ => None,
        }
    }
}

/// Remote document store holding databases, collections, users and permissions
///
/// Reads report absence as [`StoreError::NotFound`]; creates report an existing
/// id as [`StoreError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_database(&self, id: &str) -> Result<Database, StoreError>;

    async fn create_database(&self, id: &str) -> Result<Database, StoreError>;

    async fn read_collection(&self, database_id: &str, id: &str) -> Result<Collection, StoreError>;

    /// Create a collection, optionally provisioning throughput for it
    async fn create_collection(
        &self,
        database_id: &str,
        id: &str,
        throughput: Option<u32>,
    ) -> Result<Collection, StoreError>;

    async fn read_user(&self, database_id: &str, user_id: &str) -> Result<Principal, StoreError>;

    async fn create_user(&self, database_id: &str, user_id: &str) -> Result<Principal, StoreError>;

    /// Read a permission, reissuing its token so it stays valid for `expiry`
    async fn read_permission(
        &self,
        database_id: &str,
        user_id: &str,
        permission_id: &PermissionId,
        expiry: Duration,
    ) -> Result<Permission, StoreError>;

    /// Create a permission for a user
    ///
    /// Conflicts when the id is taken or when the user already holds a
    /// permission on the same resource.
    async fn create_permission(
        &self,
        user: &Principal,
        request: &PermissionRequest,
        expiry: Duration,
    ) -> Result<Permission, StoreError>;

    async fn delete_permission(
        &self,
        database_id: &str,
        user_id: &str,
        permission_id: &PermissionId,
    ) -> Result<(), StoreError>;
}

/// Remote secret store (a key vault) holding cached tokens
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` when it does not exist
    async fn get_secret(&self, vault_url: &str, name: &str)
        -> Result<Option<CachedSecret>, StoreError>;

    /// Create or overwrite a secret
    async fn set_secret(
        &self,
        vault_url: &str,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        content_type: Option<&str>,
    ) -> Result<CachedSecret, StoreError>;
}
