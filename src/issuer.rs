//! Per-user permission lookup-or-create
//!
//! A user holds at most one permission per collection. Its id is derived
//! from (database, user, mode), so switching modes means deleting the
//! permission under the other id before the new one can be created.

use crate::auth::{other_mode_id, permission_id, PermissionId, PermissionMode};
use crate::events::{Events, ProvisioningEvent};
use crate::provisioning::{ProvisioningError, ResourceProvisioner};
use crate::storage::{
    Collection, DocumentStore, Permission, PermissionRequest, Principal, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IssueError {
    #[error("collection {database}/{collection} could not be provisioned: {source}")]
    CollectionNotFound {
        database: String,
        collection: String,
        #[source]
        source: ProvisioningError,
    },

    #[error("failed to get or create user {user} in database {database}: {source}")]
    Principal {
        database: String,
        user: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read permission {permission_id}: {source}")]
    ReadPermission {
        permission_id: PermissionId,
        #[source]
        source: StoreError,
    },

    #[error("failed to create permission {permission_id}: {source}")]
    CreatePermission {
        permission_id: PermissionId,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete permission {permission_id}: {source}")]
    DeletePermission {
        permission_id: PermissionId,
        #[source]
        source: StoreError,
    },

    #[error("permission {permission_id} still conflicts after replacing the other mode: {source}")]
    PermissionConflict {
        permission_id: PermissionId,
        #[source]
        source: StoreError,
    },
}

impl IssueError {
    /// The store error at the bottom of the failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            IssueError::CollectionNotFound { source, .. } => source.store_error(),
            IssueError::Principal { source, .. }
            | IssueError::ReadPermission { source, .. }
            | IssueError::CreatePermission { source, .. }
            | IssueError::DeletePermission { source, .. }
            | IssueError::PermissionConflict { source, .. } => Some(source),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IssueError::CollectionNotFound { .. } => "collection_not_found",
            IssueError::Principal { .. } => "principal",
            IssueError::ReadPermission { .. } => "read_permission",
            IssueError::CreatePermission { .. } => "create_permission",
            IssueError::DeletePermission { .. } => "delete_permission",
            IssueError::PermissionConflict { .. } => "permission_conflict",
        }
    }
}

pub struct PermissionIssuer {
    store: Arc<dyn DocumentStore>,
    provisioner: Arc<ResourceProvisioner>,
    events: Events,
}

impl PermissionIssuer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provisioner: Arc<ResourceProvisioner>,
        events: Events,
    ) -> Self {
        Self {
            store,
            provisioner,
            events,
        }
    }

    /// Return the user's permission on the collection, creating what is missing
    ///
    /// The collection, the user and the permission are created on demand. The
    /// returned token is valid for `duration`.
    pub async fn get_or_create_permission(
        &self,
        database_id: &str,
        collection_id: &str,
        user_id: &str,
        mode: PermissionMode,
        duration: Duration,
    ) -> Result<Permission, IssueError> {
        let permission_id = permission_id(database_id, user_id, mode);

        let result = self
            .issue(database_id, collection_id, user_id, mode, &permission_id, duration)
            .await;

        if let Err(e) = &result {
            self.events.emit(ProvisioningEvent::IssueFailed {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
                user: user_id.to_string(),
                mode,
                permission_id,
                error: e.to_string(),
                advice: e.store_error().and_then(StoreError::advice),
            });
        }

        result
    }

    async fn issue(
        &self,
        database_id: &str,
        collection_id: &str,
        user_id: &str,
        mode: PermissionMode,
        permission_id: &PermissionId,
        duration: Duration,
    ) -> Result<Permission, IssueError> {
        self.provisioner
            .ensure(database_id, collection_id)
            .await
            .map_err(|source| IssueError::CollectionNotFound {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
                source,
            })?;

        let (principal, created) = self
            .get_or_create_principal(database_id, user_id)
            .await
            .map_err(|source| IssueError::Principal {
                database: database_id.to_string(),
                user: user_id.to_string(),
                source,
            })?;

        let request = PermissionRequest {
            id: permission_id.clone(),
            resource_link: Collection::link(database_id, collection_id),
            mode,
        };

        // A new user cannot hold any permission yet
        if created {
            return self.create_permission(&principal, &request, duration).await;
        }

        match self
            .store
            .read_permission(database_id, user_id, permission_id, duration)
            .await
        {
            Ok(permission) if permission.resource_link == request.resource_link => {
                self.events.emit(ProvisioningEvent::PermissionFound {
                    database: database_id.to_string(),
                    user: user_id.to_string(),
                    permission_id: permission_id.clone(),
                });
                Ok(permission)
            }
            Ok(permission) => {
                // Same id on another collection of the database
                self.events.emit(ProvisioningEvent::PermissionRetargeted {
                    database: database_id.to_string(),
                    user: user_id.to_string(),
                    permission_id: permission_id.clone(),
                    previous_resource: permission.resource_link,
                });
                self.delete_permission(&principal, permission_id).await?;
                self.create_permission(&principal, &request, duration).await
            }
            Err(e) if e.is_not_found() => {
                self.events.emit(ProvisioningEvent::PermissionMissing {
                    database: database_id.to_string(),
                    user: user_id.to_string(),
                    permission_id: permission_id.clone(),
                });
                self.create_permission(&principal, &request, duration).await
            }
            Err(source) => Err(IssueError::ReadPermission {
                permission_id: permission_id.clone(),
                source,
            }),
        }
    }

    /// The principal and whether this call created it
    async fn get_or_create_principal(
        &self,
        database_id: &str,
        user_id: &str,
    ) -> Result<(Principal, bool), StoreError> {
        match self.store.read_user(database_id, user_id).await {
            Ok(principal) => {
                self.events.emit(ProvisioningEvent::PrincipalFound {
                    database: database_id.to_string(),
                    user: user_id.to_string(),
                });
                return Ok((principal, false));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.store.create_user(database_id, user_id).await {
            Ok(principal) => {
                self.events.emit(ProvisioningEvent::PrincipalCreated {
                    database: database_id.to_string(),
                    user: user_id.to_string(),
                });
                Ok((principal, true))
            }
            // A concurrent request created the user first
            Err(e) if e.is_conflict() => {
                let principal = self.store.read_user(database_id, user_id).await?;
                Ok((principal, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Create the permission, replacing the other-mode permission on conflict
    async fn create_permission(
        &self,
        principal: &Principal,
        request: &PermissionRequest,
        duration: Duration,
    ) -> Result<Permission, IssueError> {
        match self
            .store
            .create_permission(principal, request, duration)
            .await
        {
            Ok(permission) => {
                self.emit_created(principal, request);
                return Ok(permission);
            }
            Err(e) if e.is_conflict() => {}
            Err(source) => {
                return Err(IssueError::CreatePermission {
                    permission_id: request.id.clone(),
                    source,
                })
            }
        }

        let other = other_mode_id(&principal.database_id, &principal.id, request.mode);
        self.events.emit(ProvisioningEvent::PermissionConflict {
            database: principal.database_id.clone(),
            user: principal.id.clone(),
            permission_id: request.id.clone(),
            replacing: other.clone(),
        });
        self.delete_permission(principal, &other).await?;

        match self
            .store
            .create_permission(principal, request, duration)
            .await
        {
            Ok(permission) => {
                self.emit_created(principal, request);
                Ok(permission)
            }
            Err(e) if e.is_conflict() => Err(IssueError::PermissionConflict {
                permission_id: request.id.clone(),
                source: e,
            }),
            Err(source) => Err(IssueError::CreatePermission {
                permission_id: request.id.clone(),
                source,
            }),
        }
    }

    /// Delete a permission; one that is already gone counts as deleted
    async fn delete_permission(
        &self,
        principal: &Principal,
        permission_id: &PermissionId,
    ) -> Result<(), IssueError> {
        match self
            .store
            .delete_permission(&principal.database_id, &principal.id, permission_id)
            .await
        {
            Ok(()) => {
                self.events.emit(ProvisioningEvent::PermissionDeleted {
                    database: principal.database_id.clone(),
                    user: principal.id.clone(),
                    permission_id: permission_id.clone(),
                });
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => Err(IssueError::DeletePermission {
                permission_id: permission_id.clone(),
                source,
            }),
        }
    }

    fn emit_created(&self, principal: &Principal, request: &PermissionRequest) {
        self.events.emit(ProvisioningEvent::PermissionCreated {
            database: principal.database_id.clone(),
            user: principal.id.clone(),
            permission_id: request.id.clone(),
            mode: request.mode,
        });
    }
}
