//! Records exchanged with the document store and the secret store

use crate::auth::{PermissionId, PermissionMode};
use crate::storage::StoreError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Longest id the document store accepts
const MAX_ID_LEN: usize = 255;

/// Check an id before it is sent to a store
///
/// Ids become path segments of resource links, so separators and URL
/// delimiters are rejected.
pub fn validate_resource_id(kind: &str, id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::BadRequest(format!("{} id cannot be empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::BadRequest(format!(
            "{} id is longer than {} characters",
            kind, MAX_ID_LEN
        )));
    }
    if let Some(c) = id.chars().find(|c| matches!(c, '/' | '\\' | '?' | '#') || c.is_control()) {
        return Err(StoreError::BadRequest(format!(
            "invalid character {:?} in {} id '{}'",
            c, kind, id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub id: String,
    pub self_link: String,
}

impl Database {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            self_link: Self::link(id),
        }
    }

    pub fn link(id: &str) -> String {
        format!("dbs/{}", id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub database_id: String,
    pub self_link: String,
}

impl Collection {
    pub fn new(database_id: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            database_id: database_id.to_string(),
            self_link: Self::link(database_id, id),
        }
    }

    /// Resource link permissions use to name a collection
    pub fn link(database_id: &str, id: &str) -> String {
        format!("dbs/{}/colls/{}", database_id, id)
    }
}

/// A per-database user that permissions are granted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub database_id: String,
    pub self_link: String,
}

impl Principal {
    pub fn new(database_id: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            database_id: database_id.to_string(),
            self_link: format!("dbs/{}/users/{}", database_id, id),
        }
    }
}

/// Permission to create for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub id: PermissionId,
    pub resource_link: String,
    pub mode: PermissionMode,
}

/// A permission held by a user, with its current token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub database_id: String,
    pub user_id: String,
    pub resource_link: String,
    pub mode: PermissionMode,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A secret as stored in the vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSecret {
    pub name: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

impl CachedSecret {
    /// Time left before expiry, `None` when the secret never expires
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<chrono::TimeDelta> {
        self.expires_at.map(|expires_at| expires_at - now)
    }

    /// True when at least `window` remains before expiry
    ///
    /// A secret without an expiry is never considered fresh; the token it
    /// holds always has one.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.remaining(now), chrono::TimeDelta::from_std(window)) {
            (Some(remaining), Ok(window)) => remaining >= window,
            _ => false,
        }
    }
}

/// `now + duration`, saturating at the latest representable instant
pub(crate) fn expiry_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
