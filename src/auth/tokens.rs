//! Resource tokens handed to callers
//!
//! Format: `type=resource&ver=1&sig=<signature>&payload=<payload>`
//! - payload: base64url JSON describing the grant
//! - signature: first 16 bytes of HMAC-SHA256(secret, payload), base64url

use crate::auth::PermissionMode;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Token prefix
pub const RESOURCE_TOKEN_PREFIX: &str = "type=resource&ver=1&";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    InvalidFormat,

    #[error("invalid token prefix: expected '{expected}'")]
    InvalidPrefix { expected: String },

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token decode error: {0}")]
    DecodeError(String),
}

/// Grant described by a resource token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTokenPayload {
    pub database_id: String,
    pub user_id: String,
    /// Link of the collection the token grants access to
    pub resource_link: String,
    pub mode: PermissionMode,
    /// Unix seconds
    pub expires_at: i64,
    /// Random per-issue value so reissued tokens never repeat
    pub nonce: String,
}

/// A signed resource token
#[derive(Debug, Clone)]
pub struct ResourceToken {
    /// The full token string including prefix
    token: String,
    /// Decoded payload
    payload: ResourceTokenPayload,
}

impl ResourceToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn payload(&self) -> &ResourceTokenPayload {
        &self.payload
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.payload.expires_at, 0)
    }

    pub fn into_string(self) -> String {
        self.token
    }
}

impl fmt::Display for ResourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// Mints and verifies resource tokens with a shared secret
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Signer with a random secret, for stores that never verify across restarts
    pub fn ephemeral() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret);
        Self::new(secret.to_vec())
    }

    fn sign(&self, payload_b64: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload_b64.as_bytes());
        let signature = mac.finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(&signature[..16])
    }

    /// Mint a token for a permission
    pub fn mint(
        &self,
        database_id: &str,
        user_id: &str,
        resource_link: &str,
        mode: PermissionMode,
        expires_at: DateTime<Utc>,
    ) -> ResourceToken {
        let mut nonce = [0u8; 12];
        rand::rng().fill(&mut nonce);

        let payload = ResourceTokenPayload {
            database_id: database_id.to_string(),
            user_id: user_id.to_string(),
            resource_link: resource_link.to_string(),
            mode,
            expires_at: expires_at.timestamp(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
        };
        let payload_json = serde_json::to_vec(&payload).expect("serialize payload");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_json);
        let signature_b64 = self.sign(&payload_b64);

        let token = format!(
            "{}sig={}&payload={}",
            RESOURCE_TOKEN_PREFIX, signature_b64, payload_b64
        );

        ResourceToken { token, payload }
    }

    /// Parse and verify a token minted with this signer's secret
    pub fn verify(&self, token: &str) -> Result<ResourceToken, TokenError> {
        let content = token
            .strip_prefix(RESOURCE_TOKEN_PREFIX)
            .ok_or_else(|| TokenError::InvalidPrefix {
                expected: RESOURCE_TOKEN_PREFIX.to_string(),
            })?;

        let (signature_b64, payload_b64) = content
            .strip_prefix("sig=")
            .and_then(|rest| rest.split_once("&payload="))
            .ok_or(TokenError::InvalidFormat)?;

        if !constant_time_eq(signature_b64.as_bytes(), self.sign(payload_b64).as_bytes()) {
            return Err(TokenError::InvalidSignature);
        }

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::DecodeError(e.to_string()))?;

        let payload: ResourceTokenPayload = serde_json::from_slice(&payload_json)
            .map_err(|e| TokenError::DecodeError(e.to_string()))?;

        Ok(ResourceToken {
            token: token.to_string(),
            payload,
        })
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSigner([REDACTED])")
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }
    result == 0
}
