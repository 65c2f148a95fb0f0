//! Structured provisioning events
//!
//! Every notable step of provisioning, permission issuance and token caching
//! is described by a [`ProvisioningEvent`]. [`Events`] logs each one through
//! `tracing` and hands it to an optional [`EventSink`]; nothing downstream
//! depends on whether a sink is attached.

use crate::auth::{PermissionId, PermissionMode};
use crate::provisioning::{RegistryStats, ResourceKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// A read confirmed the resource exists
    ResourceFound { key: ResourceKey },
    /// A read reported the resource absent; creating it
    ResourceMissing { key: ResourceKey },
    ResourceCreated { key: ResourceKey },
    /// A create conflicted, so someone else created it first
    ResourceCreatedElsewhere { key: ResourceKey },
    /// The caller awaited a creation already in flight
    CreationJoined { key: ResourceKey },
    ProvisioningFailed {
        key: ResourceKey,
        error: String,
        advice: Option<&'static str>,
    },
    PrincipalFound { database: String, user: String },
    PrincipalCreated { database: String, user: String },
    PermissionFound {
        database: String,
        user: String,
        permission_id: PermissionId,
    },
    PermissionMissing {
        database: String,
        user: String,
        permission_id: PermissionId,
    },
    PermissionCreated {
        database: String,
        user: String,
        permission_id: PermissionId,
        mode: PermissionMode,
    },
    /// The permission id exists but points at another collection
    PermissionRetargeted {
        database: String,
        user: String,
        permission_id: PermissionId,
        previous_resource: String,
    },
    /// Creating conflicted; the other-mode permission is being replaced
    PermissionConflict {
        database: String,
        user: String,
        permission_id: PermissionId,
        replacing: PermissionId,
    },
    PermissionDeleted {
        database: String,
        user: String,
        permission_id: PermissionId,
    },
    IssueFailed {
        database: String,
        collection: String,
        user: String,
        mode: PermissionMode,
        permission_id: PermissionId,
        error: String,
        advice: Option<&'static str>,
    },
    TokenCacheHit {
        database: String,
        collection: String,
        user: String,
    },
    TokenCacheMiss {
        database: String,
        collection: String,
        user: String,
    },
    /// A cached token was found but is too close to expiry or for another mode
    TokenStale {
        database: String,
        collection: String,
        user: String,
        remaining_secs: Option<i64>,
    },
    TokenIssued {
        database: String,
        collection: String,
        user: String,
        mode: PermissionMode,
        expires_at: DateTime<Utc>,
    },
    WarmTick { late: bool, stats: RegistryStats },
}

impl ProvisioningEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            ProvisioningEvent::ResourceFound { .. } => "resource_found",
            ProvisioningEvent::ResourceMissing { .. } => "resource_missing",
            ProvisioningEvent::ResourceCreated { .. } => "resource_created",
            ProvisioningEvent::ResourceCreatedElsewhere { .. } => "resource_created_elsewhere",
            ProvisioningEvent::CreationJoined { .. } => "creation_joined",
            ProvisioningEvent::ProvisioningFailed { .. } => "provisioning_failed",
            ProvisioningEvent::PrincipalFound { .. } => "principal_found",
            ProvisioningEvent::PrincipalCreated { .. } => "principal_created",
            ProvisioningEvent::PermissionFound { .. } => "permission_found",
            ProvisioningEvent::PermissionMissing { .. } => "permission_missing",
            ProvisioningEvent::PermissionCreated { .. } => "permission_created",
            ProvisioningEvent::PermissionRetargeted { .. } => "permission_retargeted",
            ProvisioningEvent::PermissionConflict { .. } => "permission_conflict",
            ProvisioningEvent::PermissionDeleted { .. } => "permission_deleted",
            ProvisioningEvent::IssueFailed { .. } => "issue_failed",
            ProvisioningEvent::TokenCacheHit { .. } => "token_cache_hit",
            ProvisioningEvent::TokenCacheMiss { .. } => "token_cache_miss",
            ProvisioningEvent::TokenStale { .. } => "token_stale",
            ProvisioningEvent::TokenIssued { .. } => "token_issued",
            ProvisioningEvent::WarmTick { .. } => "warm_tick",
        }
    }
}

/// Observer for provisioning events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ProvisioningEvent);
}

/// Handle every component emits through
#[derive(Clone, Default)]
pub struct Events {
    sink: Option<Arc<dyn EventSink>>,
}

impl Events {
    /// Log only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn emit(&self, event: ProvisioningEvent) {
        log(&event);
        if let Some(sink) = &self.sink {
            sink.emit(&event);
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

fn log(event: &ProvisioningEvent) {
    use ProvisioningEvent::*;

    match event {
        ResourceFound { key } => debug!(resource = %key, "Found existing resource"),
        ResourceMissing { key } => info!(resource = %key, "Resource not found, creating"),
        ResourceCreated { key } => info!(resource = %key, "Created resource"),
        ResourceCreatedElsewhere { key } => {
            info!(resource = %key, "Resource was created concurrently elsewhere")
        }
        CreationJoined { key } => {
            debug!(resource = %key, "Resource is already being created, awaiting existing attempt")
        }
        ProvisioningFailed { key, error, advice } => {
            error!(resource = %key, error = %error, advice = ?advice, "Provisioning failed")
        }
        PrincipalFound { database, user } => {
            debug!(database = %database, user = %user, "Found existing user")
        }
        PrincipalCreated { database, user } => {
            info!(database = %database, user = %user, "Created user")
        }
        PermissionFound { database, user, permission_id } => debug!(
            database = %database, user = %user, permission_id = %permission_id,
            "Found existing permission"
        ),
        PermissionMissing { database, user, permission_id } => debug!(
            database = %database, user = %user, permission_id = %permission_id,
            "Permission not found, creating"
        ),
        PermissionCreated { database, user, permission_id, mode } => info!(
            database = %database, user = %user, permission_id = %permission_id, mode = %mode,
            "Created permission"
        ),
        PermissionRetargeted { database, user, permission_id, previous_resource } => info!(
            database = %database, user = %user, permission_id = %permission_id,
            previous_resource = %previous_resource,
            "Permission points at another collection, replacing"
        ),
        PermissionConflict { database, user, permission_id, replacing } => info!(
            database = %database, user = %user, permission_id = %permission_id,
            replacing = %replacing,
            "Permission create conflicted, replacing other mode permission"
        ),
        PermissionDeleted { database, user, permission_id } => info!(
            database = %database, user = %user, permission_id = %permission_id,
            "Deleted permission"
        ),
        IssueFailed { database, collection, user, mode, permission_id, error, advice } => error!(
            database = %database, collection = %collection, user = %user, mode = %mode,
            permission_id = %permission_id, error = %error, advice = ?advice,
            "Error getting or creating permission"
        ),
        TokenCacheHit { database, collection, user } => debug!(
            database = %database, collection = %collection, user = %user,
            "Serving cached token"
        ),
        TokenCacheMiss { database, collection, user } => debug!(
            database = %database, collection = %collection, user = %user,
            "No cached token"
        ),
        TokenStale { database, collection, user, remaining_secs } => debug!(
            database = %database, collection = %collection, user = %user,
            remaining_secs = ?remaining_secs,
            "Cached token is stale, reissuing"
        ),
        TokenIssued { database, collection, user, mode, expires_at } => info!(
            database = %database, collection = %collection, user = %user, mode = %mode,
            expires_at = %expires_at,
            "Issued token"
        ),
        WarmTick { late, stats } => {
            if *late {
                warn!(
                    initialized = stats.initialized, initializing = stats.initializing,
                    in_flight = stats.in_flight,
                    "Warm tick is running late"
                );
            } else {
                info!(
                    initialized = stats.initialized, initializing = stats.initializing,
                    in_flight = stats.in_flight,
                    "Warm tick"
                );
            }
        }
    }
}

/// Sink that keeps every event, for tests and diagnostics
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProvisioningEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProvisioningEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ProvisioningEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_sink() {
        // Logging only, must not panic
        Events::new().emit(ProvisioningEvent::ResourceCreated {
            key: ResourceKey::database("db1"),
        });
    }

    #[test]
    fn test_recording_sink() {
        let sink = Arc::new(RecordingSink::new());
        let events = Events::with_sink(sink.clone());

        events.emit(ProvisioningEvent::ResourceMissing {
            key: ResourceKey::database("db1"),
        });
        events.emit(ProvisioningEvent::ResourceCreated {
            key: ResourceKey::database("db1"),
        });
        events.clone().emit(ProvisioningEvent::ResourceCreated {
            key: ResourceKey::collection("db1", "coll1"),
        });

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.count("resource_created"), 2);
        assert_eq!(sink.count("resource_missing"), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_debug_hides_sink() {
        let events = Events::with_sink(Arc::new(RecordingSink::new()));
        assert_eq!(format!("{:?}", events), "Events { sink: true }");
    }
}
