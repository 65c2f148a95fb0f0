//! Permission modes, caller identity and resource tokens
//!
//! Modes:
//! - `read`: read documents in a collection
//! - `all`: full access to a collection
//!
//! A user holds at most one live permission per collection. Permission ids are
//! derived from (database, user, mode), so switching modes means deleting the
//! permission under one id and creating it under the other.

mod identity;
mod modes;
mod tokens;

pub use identity::{IdentityError, UserId, ANONYMOUS_USER_ID};
pub use modes::{other_mode_id, permission_id, PermissionId, PermissionMode};
pub use tokens::{ResourceToken, ResourceTokenPayload, TokenError, TokenSigner, RESOURCE_TOKEN_PREFIX};
