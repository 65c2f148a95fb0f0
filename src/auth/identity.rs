//! Caller identity
//!
//! The identity provider in front of the service hands us an opaque user id.
//! Callers without one share the anonymous sentinel id.

use std::fmt;
use thiserror::Error;

/// Sentinel id for callers without an identity
pub const ANONYMOUS_USER_ID: &str = "anonymous_user";

/// Longest id the document store accepts
const MAX_ID_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("user id cannot be empty")]
    Empty,

    #[error("user id is longer than 255 characters")]
    TooLong,

    #[error("invalid character '{0}' in user id")]
    InvalidChar(char),

    #[error("user id 'anonymous_user' is reserved")]
    Reserved,
}

/// A validated user id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Parse and validate an authenticated user id
    pub fn parse(id: &str) -> Result<Self, IdentityError> {
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        if id.len() > MAX_ID_LEN {
            return Err(IdentityError::TooLong);
        }
        if let Some(c) = id.chars().find(|c| matches!(c, '/' | '\\' | '?' | '#') || c.is_control()) {
            return Err(IdentityError::InvalidChar(c));
        }
        if id == ANONYMOUS_USER_ID {
            return Err(IdentityError::Reserved);
        }

        Ok(Self(id.to_string()))
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS_USER_ID.to_string())
    }

    /// Resolve the identity carried by a request header
    ///
    /// A missing or blank header is an anonymous caller.
    pub fn from_header(value: Option<&str>) -> Result<Self, IdentityError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::anonymous()),
            Some(id) => Self::parse(id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_USER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
