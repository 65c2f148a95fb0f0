//! In-memory document and secret stores
//!
//! Same not-found and conflict semantics as the Postgres backend. Each store
//! also counts calls per operation, can delay every call, and can be told to
//! fail upcoming calls, which is what the provisioning tests lean on.

use crate::auth::{PermissionId, TokenSigner};
use crate::storage::resources::expiry_after;
use crate::storage::{
    async_trait, validate_resource_id, CachedSecret, Collection, Database, DocumentStore,
    Permission, PermissionRequest, Principal, SecretStore, StoreError,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Operations a memory store counts and can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ReadDatabase,
    CreateDatabase,
    ReadCollection,
    CreateCollection,
    ReadUser,
    CreateUser,
    ReadPermission,
    CreatePermission,
    DeletePermission,
    GetSecret,
    SetSecret,
}

/// Call counting, latency and failure injection shared by both stores
#[derive(Default)]
struct Instrumentation {
    calls: DashMap<StoreOperation, u64>,
    failures: Mutex<HashMap<StoreOperation, VecDeque<StoreError>>>,
    latency: Option<Duration>,
}

impl Instrumentation {
    /// Record a call, wait out the latency, and pop an injected failure
    async fn enter(&self, op: StoreOperation) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn calls(&self, op: StoreOperation) -> u64 {
        self.calls.get(&op).map(|count| *count).unwrap_or(0)
    }

    fn fail_next(&self, op: StoreOperation, err: StoreError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }
}

type UserKey = (String, String);

/// In-memory document store
pub struct MemoryDocumentStore {
    databases: DashMap<String, Database>,
    collections: DashMap<(String, String), Collection>,
    users: DashMap<UserKey, Principal>,
    /// Per-user permissions by id; one lock so the resource uniqueness check
    /// and the insert happen together
    permissions: Mutex<HashMap<UserKey, HashMap<PermissionId, Permission>>>,
    signer: TokenSigner,
    instrumentation: Instrumentation,
}

impl MemoryDocumentStore {
    pub fn new(signer: TokenSigner) -> Self {
        Self {
            databases: DashMap::new(),
            collections: DashMap::new(),
            users: DashMap::new(),
            permissions: Mutex::new(HashMap::new()),
            signer,
            instrumentation: Instrumentation::default(),
        }
    }

    /// Delay every call, widening the window for concurrent callers to overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.instrumentation.latency = Some(latency);
        self
    }

    /// Fail the next call to `op` with `err` (queued per operation)
    pub fn fail_next(&self, op: StoreOperation, err: StoreError) {
        self.instrumentation.fail_next(op, err);
    }

    /// Number of calls made to `op`, including failed ones
    pub fn calls(&self, op: StoreOperation) -> u64 {
        self.instrumentation.calls(op)
    }

    pub fn has_database(&self, id: &str) -> bool {
        self.databases.contains_key(id)
    }

    pub fn has_collection(&self, database_id: &str, id: &str) -> bool {
        self.collections
            .contains_key(&(database_id.to_string(), id.to_string()))
    }

    pub fn has_user(&self, database_id: &str, user_id: &str) -> bool {
        self.users
            .contains_key(&(database_id.to_string(), user_id.to_string()))
    }

    /// Ids of the live permissions a user holds, sorted
    pub fn permission_ids(&self, database_id: &str, user_id: &str) -> Vec<PermissionId> {
        let permissions = self.permissions.lock();
        let mut ids: Vec<PermissionId> = permissions
            .get(&(database_id.to_string(), user_id.to_string()))
            .map(|held| held.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    fn mint(&self, permission: &mut Permission, expiry: Duration) {
        let expires_at = expiry_after(Utc::now(), expiry);
        let token = self.signer.mint(
            &permission.database_id,
            &permission.user_id,
            &permission.resource_link,
            permission.mode,
            expires_at,
        );
        permission.token = token.into_string();
        permission.expires_at = expires_at;
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new(TokenSigner::ephemeral())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_database(&self, id: &str) -> Result<Database, StoreError> {
        self.instrumentation.enter(StoreOperation::ReadDatabase).await?;

        self.databases
            .get(id)
            .map(|db| db.clone())
            .ok_or_else(|| StoreError::NotFound(format!("database {}", id)))
    }

    async fn create_database(&self, id: &str) -> Result<Database, StoreError> {
        self.instrumentation.enter(StoreOperation::CreateDatabase).await?;
        validate_resource_id("database", id)?;

        match self.databases.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("database {}", id))),
            Entry::Vacant(slot) => Ok(slot.insert(Database::new(id)).clone()),
        }
    }

    async fn read_collection(&self, database_id: &str, id: &str) -> Result<Collection, StoreError> {
        self.instrumentation.enter(StoreOperation::ReadCollection).await?;

        self.collections
            .get(&(database_id.to_string(), id.to_string()))
            .map(|coll| coll.clone())
            .ok_or_else(|| {
                StoreError::NotFound(format!("collection {} in database {}", id, database_id))
            })
    }

    async fn create_collection(
        &self,
        database_id: &str,
        id: &str,
        _throughput: Option<u32>,
    ) -> Result<Collection, StoreError> {
        self.instrumentation.enter(StoreOperation::CreateCollection).await?;
        validate_resource_id("collection", id)?;

        if !self.databases.contains_key(database_id) {
            return Err(StoreError::NotFound(format!("database {}", database_id)));
        }

        match self.collections.entry((database_id.to_string(), id.to_string())) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "collection {} in database {}",
                id, database_id
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(Collection::new(database_id, id)).clone()),
        }
    }

    async fn read_user(&self, database_id: &str, user_id: &str) -> Result<Principal, StoreError> {
        self.instrumentation.enter(StoreOperation::ReadUser).await?;

        self.users
            .get(&(database_id.to_string(), user_id.to_string()))
            .map(|user| user.clone())
            .ok_or_else(|| {
                StoreError::NotFound(format!("user {} in database {}", user_id, database_id))
            })
    }

    async fn create_user(&self, database_id: &str, user_id: &str) -> Result<Principal, StoreError> {
        self.instrumentation.enter(StoreOperation::CreateUser).await?;
        validate_resource_id("user", user_id)?;

        if !self.databases.contains_key(database_id) {
            return Err(StoreError::NotFound(format!("database {}", database_id)));
        }

        match self.users.entry((database_id.to_string(), user_id.to_string())) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "user {} in database {}",
                user_id, database_id
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(Principal::new(database_id, user_id)).clone()),
        }
    }

    async fn read_permission(
        &self,
        database_id: &str,
        user_id: &str,
        permission_id: &PermissionId,
        expiry: Duration,
    ) -> Result<Permission, StoreError> {
        self.instrumentation.enter(StoreOperation::ReadPermission).await?;

        let mut permissions = self.permissions.lock();
        let permission = permissions
            .get_mut(&(database_id.to_string(), user_id.to_string()))
            .and_then(|held| held.get_mut(permission_id))
            .ok_or_else(|| StoreError::NotFound(format!("permission {}", permission_id)))?;

        self.mint(permission, expiry);
        Ok(permission.clone())
    }

    async fn create_permission(
        &self,
        user: &Principal,
        request: &PermissionRequest,
        expiry: Duration,
    ) -> Result<Permission, StoreError> {
        self.instrumentation.enter(StoreOperation::CreatePermission).await?;
        validate_resource_id("permission", request.id.as_str())?;

        if !self.has_user(&user.database_id, &user.id) {
            return Err(StoreError::NotFound(format!(
                "user {} in database {}",
                user.id, user.database_id
            )));
        }

        let mut permissions = self.permissions.lock();
        let held = permissions
            .entry((user.database_id.clone(), user.id.clone()))
            .or_default();

        if held.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("permission {}", request.id)));
        }
        if let Some(existing) = held
            .values()
            .find(|p| p.resource_link == request.resource_link)
        {
            return Err(StoreError::Conflict(format!(
                "user {} already holds permission {} on {}",
                user.id, existing.id, request.resource_link
            )));
        }

        let mut permission = Permission {
            id: request.id.clone(),
            database_id: user.database_id.clone(),
            user_id: user.id.clone(),
            resource_link: request.resource_link.clone(),
            mode: request.mode,
            token: String::new(),
            expires_at: Utc::now(),
        };
        self.mint(&mut permission, expiry);
        held.insert(request.id.clone(), permission.clone());

        Ok(permission)
    }

    async fn delete_permission(
        &self,
        database_id: &str,
        user_id: &str,
        permission_id: &PermissionId,
    ) -> Result<(), StoreError> {
        self.instrumentation.enter(StoreOperation::DeletePermission).await?;

        self.permissions
            .lock()
            .get_mut(&(database_id.to_string(), user_id.to_string()))
            .and_then(|held| held.remove(permission_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("permission {}", permission_id)))
    }
}

/// In-memory secret store, keyed by (vault url, secret name)
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: DashMap<(String, String), CachedSecret>,
    instrumentation: Instrumentation,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret without counting a call
    pub fn insert(&self, vault_url: &str, secret: CachedSecret) {
        self.secrets
            .insert((vault_url.to_string(), secret.name.clone()), secret);
    }

    /// Peek at a secret without counting a call
    pub fn get(&self, vault_url: &str, name: &str) -> Option<CachedSecret> {
        self.secrets
            .get(&(vault_url.to_string(), name.to_string()))
            .map(|secret| secret.clone())
    }

    pub fn fail_next(&self, op: StoreOperation, err: StoreError) {
        self.instrumentation.fail_next(op, err);
    }

    pub fn calls(&self, op: StoreOperation) -> u64 {
        self.instrumentation.calls(op)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(
        &self,
        vault_url: &str,
        name: &str,
    ) -> Result<Option<CachedSecret>, StoreError> {
        self.instrumentation.enter(StoreOperation::GetSecret).await?;
        Ok(self.get(vault_url, name))
    }

    async fn set_secret(
        &self,
        vault_url: &str,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        content_type: Option<&str>,
    ) -> Result<CachedSecret, StoreError> {
        self.instrumentation.enter(StoreOperation::SetSecret).await?;

        let secret = CachedSecret {
            name: name.to_string(),
            value: value.to_string(),
            expires_at: Some(expires_at),
            content_type: content_type.map(str::to_string),
        };
        self.insert(vault_url, secret.clone());
        Ok(secret)
    }
}
