use std::path::PathBuf;

use thiserror::Error;

use crate::server::context::CancelReason;

/// Errors raised while loading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The env file could not be opened or parsed
    #[error("Error loading config file {path}: {message}")]
    File { path: PathBuf, message: String },

    /// A required key is absent
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A required key is present but empty
    #[error("Setting {0} must not be empty")]
    Empty(&'static str),

    /// A key holds a value that cannot be used
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Errors reported by the store driver.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The deployment could not be reached
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// Another user already holds this login
    #[error("Login already exists: {0}")]
    DuplicateLogin(String),

    /// The record to update does not exist
    #[error("User not found: {0}")]
    NotFound(String),

    /// Any other driver failure
    #[error("Database error: {0}")]
    Backend(String),
}

/// Errors produced when signing or parsing bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The signing secret is empty
    #[error("Token secret must not be empty")]
    EmptySecret,

    /// The token is not a well-formed three-segment JWT
    #[error("Malformed token")]
    Malformed,

    /// The header names an algorithm other than HS256
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The signature does not match the header and payload
    #[error("Invalid token signature")]
    InvalidSignature,

    /// The token's expiry is not in the future
    #[error("Token expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    /// Claims could not be serialized
    #[error("Failed to encode token: {0}")]
    Encode(String),
}

/// Errors extracting Basic credentials from a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("Missing Authorization header")]
    Missing,

    #[error("Authorization scheme is not Basic")]
    WrongScheme,

    #[error("Credentials are not valid base64 UTF-8")]
    InvalidEncoding,

    #[error("Credentials are missing the ':' separator")]
    MissingSeparator,
}

/// Errors returned by request handlers.
///
/// Converted to an HTTP response in [`crate::server::handlers`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body or field failed validation (400)
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    /// Missing or rejected credentials (401)
    #[error("unauthorized")]
    Unauthorized,

    /// Unique constraint violated (409)
    #[error("{0}")]
    Conflict(String),

    /// The request was cancelled before a response was produced (504)
    #[error("Request cancelled: {0:?}")]
    Cancelled(CancelReason),

    /// Store failure (500)
    #[error(transparent)]
    Store(StoreError),

    /// Anything else that should never reach the client in detail (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Create a validation error bound to a request field.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    /// Create a validation error that is not bound to a field.
    pub fn invalid_body(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field: None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateLogin(login) => {
                ApiError::Conflict(format!("Login already exists: {}", login))
            }
            StoreError::NotFound(_) => ApiError::Unauthorized,
            other => ApiError::Store(other),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(message) => ApiError::Internal(message),
            _ => ApiError::Unauthorized,
        }
    }
}
