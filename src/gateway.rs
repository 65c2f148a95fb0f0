//! Token cache in front of the permission issuer
//!
//! Tokens are cached in the secret store under a name derived from
//! (database, collection, user). A cached token is served while it has at
//! least the refresh window left and was issued for the requested mode;
//! anything else goes back to the issuer.

use crate::auth::{PermissionId, PermissionMode};
use crate::events::{Events, ProvisioningEvent};
use crate::issuer::{IssueError, PermissionIssuer};
use crate::storage::{expiry_after, SecretStore, StoreError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(600);
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(5 * 60 * 60);
pub const DEFAULT_VAULT_URL: &str = "local";

/// Prefix of every cached token name
pub const CACHE_KEY_PREFIX: &str = "tok-";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("secret store error for {name}: {source}")]
    Secret {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error("permission {permission_id} was issued without a token")]
    MissingToken { permission_id: PermissionId },
}

impl GatewayError {
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            GatewayError::Secret { source, .. } => Some(source),
            GatewayError::Issue(e) => e.store_error(),
            GatewayError::MissingToken { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Secret { .. } => "secret_store",
            GatewayError::Issue(e) => e.kind(),
            GatewayError::MissingToken { .. } => "missing_token",
        }
    }

    /// Retry hint when the store rate limited the request
    pub fn retry_after(&self) -> Option<Duration> {
        self.store_error().and_then(StoreError::retry_after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Secret store (vault) the tokens are cached in
    pub vault_url: String,
    /// Cached tokens with less than this left are reissued
    pub refresh_window: Duration,
    /// Lifetime of newly issued tokens
    pub token_duration: Duration,
    /// Mode used when the caller does not ask for one
    pub default_mode: PermissionMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            vault_url: DEFAULT_VAULT_URL.to_string(),
            refresh_window: DEFAULT_REFRESH_WINDOW,
            token_duration: DEFAULT_TOKEN_DURATION,
            default_mode: PermissionMode::All,
        }
    }
}

impl GatewayConfig {
    pub fn with_vault_url(mut self, vault_url: impl Into<String>) -> Self {
        self.vault_url = vault_url.into();
        self
    }

    pub fn with_refresh_window(mut self, refresh_window: Duration) -> Self {
        self.refresh_window = refresh_window;
        self
    }

    pub fn with_token_duration(mut self, token_duration: Duration) -> Self {
        self.token_duration = token_duration;
        self
    }

    pub fn with_default_mode(mut self, default_mode: PermissionMode) -> Self {
        self.default_mode = default_mode;
        self
    }
}

/// Secret name for a cached token
///
/// Each part is length-prefixed before hashing, so ("a-b", "c") and
/// ("a", "b-c") never share a name.
pub fn cache_key(database_id: &str, collection_id: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [database_id, collection_id, user_id] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{}{}", CACHE_KEY_PREFIX, hex::encode(hasher.finalize()))
}

pub struct TokenGateway {
    secrets: Arc<dyn SecretStore>,
    issuer: Arc<PermissionIssuer>,
    config: GatewayConfig,
    events: Events,
}

impl TokenGateway {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        issuer: Arc<PermissionIssuer>,
        config: GatewayConfig,
        events: Events,
    ) -> Self {
        Self {
            secrets,
            issuer,
            config,
            events,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Token granting `mode` on the collection, from the cache when possible
    pub async fn get_token(
        &self,
        database_id: &str,
        collection_id: &str,
        user_id: &str,
        mode: PermissionMode,
        duration: Duration,
    ) -> Result<String, GatewayError> {
        let name = cache_key(database_id, collection_id, user_id);
        let vault_url = self.config.vault_url.as_str();

        let cached = match self.secrets.get_secret(vault_url, &name).await {
            Ok(cached) => cached,
            Err(e) if e.is_not_found() => None,
            Err(source) => {
                return Err(GatewayError::Secret {
                    name: name.clone(),
                    source,
                })
            }
        };

        let now = Utc::now();
        match cached {
            Some(secret)
                if secret.content_type.as_deref() == Some(mode.as_str())
                    && !secret.value.is_empty()
                    && secret.is_fresh(now, self.config.refresh_window) =>
            {
                self.events.emit(ProvisioningEvent::TokenCacheHit {
                    database: database_id.to_string(),
                    collection: collection_id.to_string(),
                    user: user_id.to_string(),
                });
                return Ok(secret.value);
            }
            Some(secret) => self.events.emit(ProvisioningEvent::TokenStale {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
                user: user_id.to_string(),
                remaining_secs: secret.remaining(now).map(|left| left.num_seconds()),
            }),
            None => self.events.emit(ProvisioningEvent::TokenCacheMiss {
                database: database_id.to_string(),
                collection: collection_id.to_string(),
                user: user_id.to_string(),
            }),
        }

        let permission = self
            .issuer
            .get_or_create_permission(database_id, collection_id, user_id, mode, duration)
            .await?;

        if permission.token.is_empty() {
            return Err(GatewayError::MissingToken {
                permission_id: permission.id,
            });
        }

        let expires_at = expiry_after(Utc::now(), duration);
        self.secrets
            .set_secret(vault_url, &name, &permission.token, expires_at, Some(mode.as_str()))
            .await
            .map_err(|source| GatewayError::Secret {
                name: name.clone(),
                source,
            })?;

        self.events.emit(ProvisioningEvent::TokenIssued {
            database: database_id.to_string(),
            collection: collection_id.to_string(),
            user: user_id.to_string(),
            mode,
            expires_at,
        });

        Ok(permission.token)
    }
}
