//! Credential extraction and password verification.
//!
//! - [`BasicCredentials`] parses `Authorization: Basic base64(login:password)`
//! - [`bearer_token`] extracts the token from `Authorization: Bearer <token>`
//! - [`PasswordHasher`] wraps bcrypt, running the expensive work on the
//!   blocking pool so request tasks keep making progress

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use tracing::error;

use crate::error::{ApiError, CredentialsError};

/// Password used to build the verifier checked for unknown logins.
const DUMMY_PASSWORD: &str = "account-api-dummy-password";

// =============================================================================
// Basic Credentials
// =============================================================================

/// A login/password pair from a Basic authorization header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicCredentials {
    /// Extract Basic credentials from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CredentialsError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or(CredentialsError::Missing)?
            .to_str()
            .map_err(|_| CredentialsError::InvalidEncoding)?;
        Self::parse(value)
    }

    /// Parse the value of an Authorization header.
    ///
    /// The scheme name is matched case-insensitively. The password may
    /// contain ':'; only the first one separates it from the login.
    pub fn parse(value: &str) -> Result<Self, CredentialsError> {
        let (scheme, encoded) = value
            .trim()
            .split_once(' ')
            .ok_or(CredentialsError::WrongScheme)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(CredentialsError::WrongScheme);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CredentialsError::InvalidEncoding)?;
        let decoded = String::from_utf8(decoded).map_err(|_| CredentialsError::InvalidEncoding)?;

        let (login, password) = decoded
            .split_once(':')
            .ok_or(CredentialsError::MissingSeparator)?;

        Ok(Self {
            login: login.to_string(),
            password: password.to_string(),
        })
    }
}

/// Extract a bearer token from request headers.
///
/// Returns `None` unless the header is `Bearer` followed by exactly one
/// non-empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

// =============================================================================
// Password Hashing
// =============================================================================

/// bcrypt hashing with a fixed cost.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("cost", &self.cost)
            .finish()
    }
}

impl PasswordHasher {
    /// Create a hasher for the given bcrypt cost.
    pub fn new(cost: u32) -> Result<Self, bcrypt::BcryptError> {
        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)?;
        Ok(Self {
            cost,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// The configured bcrypt cost.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password into a salted verifier.
    pub async fn hash(&self, password: String) -> Result<String, ApiError> {
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))?
            .map_err(|e| ApiError::Internal(format!("failed to hash password: {}", e)))
    }

    /// Check a password against a stored verifier.
    ///
    /// When `stored` is `None` (unknown login) the password is checked
    /// against a dummy verifier of the same cost and `false` is returned,
    /// so both failure cases take the same time.
    pub async fn verify(&self, password: String, stored: Option<String>) -> bool {
        let dummy = Arc::clone(&self.dummy_hash);
        let result = tokio::task::spawn_blocking(move || {
            let known = stored.is_some();
            let hash = stored.unwrap_or_else(|| dummy.to_string());
            let matched = bcrypt::verify(password, &hash).unwrap_or(false);
            known && matched
        })
        .await;

        match result {
            Ok(matched) => matched,
            Err(e) => {
                error!("Password verification task failed: {}", e);
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
