//! permgate - scoped, time-limited document store permissions
//!
//! Lazily provisions databases and collections on first use, issues per-user
//! permissions in read or full mode, and caches the resulting tokens in a
//! secret store until they near expiry.

pub mod auth;
pub mod events;
pub mod gateway;
pub mod issuer;
pub mod provisioning;
pub mod server;
pub mod service;
pub mod storage;

pub use auth::{PermissionId, PermissionMode, TokenSigner, UserId};
pub use events::{EventSink, Events, ProvisioningEvent};
pub use gateway::{GatewayConfig, GatewayError, TokenGateway};
pub use issuer::{IssueError, PermissionIssuer};
pub use provisioning::{ProvisioningConfig, ResourceProvisioner, ResourceRegistry};
pub use server::{PermgateServer, ServerConfig};
pub use service::{Permgate, PermgateConfig};
pub use storage::{DocumentStore, SecretStore, StoreError};
