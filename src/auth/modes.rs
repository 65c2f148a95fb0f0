//! Permission modes and deterministic permission ids

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level granted on a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Read documents in the collection
    Read,
    /// Read, write and delete documents in the collection
    All,
}

impl PermissionMode {
    /// Parse from string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" => Some(PermissionMode::Read),
            "all" => Some(PermissionMode::All),
            _ => None,
        }
    }

    /// The mode a conflicting permission for the same user would hold
    pub fn other(self) -> Self {
        match self {
            PermissionMode::Read => PermissionMode::All,
            PermissionMode::All => PermissionMode::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Read => "read",
            PermissionMode::All => "all",
        }
    }

    /// Upper-case form used inside permission ids
    fn id_segment(self) -> &'static str {
        match self {
            PermissionMode::Read => "READ",
            PermissionMode::All => "ALL",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid permission mode: {}. Must be read or all", s))
    }
}

/// Identifier of a user's permission in a database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(String);

impl PermissionId {
    /// Wrap an id read back from storage
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the permission id for a user and mode: `{database}-{user}-{MODE}`
pub fn permission_id(database_id: &str, user_id: &str, mode: PermissionMode) -> PermissionId {
    PermissionId(format!("{}-{}-{}", database_id, user_id, mode.id_segment()))
}

/// The id the same user's permission would have under the other mode
pub fn other_mode_id(database_id: &str, user_id: &str, mode: PermissionMode) -> PermissionId {
    permission_id(database_id, user_id, mode.other())
}
