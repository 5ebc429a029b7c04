// SPDX-License-Identifier: MIT OR Apache-2.0
//! JWT validation at the socket boundary.
//!
//! HS256 only. `exp` is honored and a token signed with any other
//! algorithm is rejected outright; there is no algorithm negotiation.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims ArqonBus reads from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (logical user).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Role attached to the connection (`admin` short-circuits checks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Tenant the connection belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Explicit capability grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// Token rejection reasons.
#[derive(Debug, Error)]
pub enum JwtAuthError {
    /// Signature, expiry, or structure failed validation.
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Validate a bearer token and extract its claims.
///
/// # Errors
///
/// Returns [`JwtAuthError`] for bad signatures, expired tokens, and any
/// algorithm other than HS256.
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtAuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Mint an HS256 token for the given claims. Used by ops tooling and the
/// test suites; the server itself only validates.
///
/// # Errors
///
/// Returns [`JwtAuthError`] if encoding fails.
pub fn issue_hs256_token(claims: &Claims, secret: &str) -> Result<String, JwtAuthError> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Mint a token with a foreign algorithm. Only exists so the suites can
/// prove the validator rejects it.
///
/// # Errors
///
/// Returns [`JwtAuthError`] if encoding fails.
pub fn issue_token_with_algorithm(
    claims: &Claims,
    secret: &str,
    algorithm: Algorithm,
) -> Result<String, JwtAuthError> {
    Ok(encode(
        &Header::new(algorithm),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn now_epoch() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Claims {
    /// Claims expiring `ttl_seconds` from now.
    #[must_use]
    pub fn expiring_in(ttl_seconds: u64) -> Self {
        Self {
            sub: None,
            role: None,
            tenant_id: None,
            permissions: None,
            exp: now_epoch() + ttl_seconds,
        }
    }

    /// Set the subject.
    #[must_use]
    pub fn subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    /// Set the role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}
