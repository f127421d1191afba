//! HTTP request handlers for the account API.
//!
//! # Endpoints
//!
//! - `POST /v1/signup` - Create an account
//! - `GET /v1/login` - Exchange Basic credentials for a bearer token
//! - `GET /v1/me` - Read the caller's account
//! - `PUT /v1/me` - Update the caller's account

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::token::unix_now;
use crate::auth::{PasswordHasher, TokenSigner};
use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TOKEN_TTL_SECS};
use crate::error::ApiError;
use crate::store::{SessionPool, User};

use super::context::{Principal, RequestContext};

/// Longest accepted login, in characters.
pub const MAX_LOGIN_LENGTH: usize = 64;

/// bcrypt only reads the first 72 bytes of a password.
pub const MAX_PASSWORD_BYTES: usize = 72;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// Everything here is immutable once the server starts.
#[derive(Clone)]
pub struct AppState {
    /// Hands out a database session per request
    pub pool: SessionPool,

    /// Signs and validates bearer tokens
    pub tokens: Arc<TokenSigner>,

    /// Hashes and verifies passwords
    pub passwords: PasswordHasher,

    /// Lifetime of issued tokens
    pub token_ttl: Duration,

    /// Deadline applied to every request
    pub request_timeout: Duration,
}

impl AppState {
    /// Create application state with default token lifetime and deadline.
    pub fn new(pool: SessionPool, tokens: TokenSigner, passwords: PasswordHasher) -> Self {
        Self {
            pool,
            tokens: Arc::new(tokens),
            passwords,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

/// Body of `POST /v1/signup`.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `PUT /v1/me`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMeRequest {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,

    /// New password
    #[serde(default)]
    pub password: Option<String>,

    /// Required whenever `password` is present
    #[serde(default)]
    pub current_password: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error body returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,

    /// Request field the error refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Response to a successful signup.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub id: String,
}

/// Response to a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Public view of a user record. Never carries the password verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            login: user.login,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ApiError to HTTP response.
///
/// 4xx are logged at DEBUG or WARN, 5xx at ERROR. Store and internal
/// details never reach the client.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation { message, field } => {
                debug!(field = ?field, "Rejected request: {}", message);
                let body = ErrorResponse::new(message.clone());
                let body = match field {
                    Some(field) => body.with_field(*field),
                    None => body,
                };
                (StatusCode::BAD_REQUEST, body)
            }

            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("unauthorized"),
            ),

            ApiError::Conflict(message) => {
                debug!("Conflict: {}", message);
                (StatusCode::CONFLICT, ErrorResponse::new(message.clone()))
            }

            ApiError::Cancelled(reason) => {
                warn!(reason = ?reason, "Request cancelled");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorResponse::new("request timed out"),
                )
            }

            ApiError::Store(e) => {
                error!(status = 500, "Store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("internal server error"),
                )
            }

            ApiError::Internal(message) => {
                error!(status = 500, "Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Map a JSON extraction failure to a 400.
fn body_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::invalid_body(rejection.body_text())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_login(login: &str) -> Result<(), ApiError> {
    let length = login.chars().count();
    if length == 0 {
        return Err(ApiError::invalid_field("login", "login must not be empty"));
    }
    if length > MAX_LOGIN_LENGTH {
        return Err(ApiError::invalid_field(
            "login",
            format!("login must be at most {} characters", MAX_LOGIN_LENGTH),
        ));
    }
    // ':' would make Basic credentials ambiguous
    if login
        .chars()
        .any(|c| c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(ApiError::invalid_field(
            "login",
            "login must not contain whitespace, control characters or ':'",
        ));
    }
    Ok(())
}

fn validate_password(field: &'static str, password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::invalid_field(field, "password must not be empty"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ApiError::invalid_field(
            field,
            format!("password must be at most {} bytes", MAX_PASSWORD_BYTES),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::invalid_field("email", "email must look like user@host")),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle account creation.
///
/// # Endpoint
///
/// `POST /v1/signup`
///
/// # Response
///
/// - `201 Created`: `{"id": "..."}`
/// - `400 Bad Request`: Malformed body or invalid field
/// - `409 Conflict`: Login already exists
pub async fn signup_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let Json(request) = body.map_err(body_rejection)?;

    validate_login(&request.login)?;
    validate_password("password", &request.password)?;
    if let Some(email) = &request.email {
        validate_email(email)?;
    }

    let password_hash = ctx.run(state.passwords.hash(request.password)).await?;

    let now = unix_now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        login: request.login,
        password_hash,
        name: request.name,
        email: request.email,
        created_at: now,
        updated_at: now,
    };
    let id = user.id.clone();

    ctx.run(ctx.db.insert_user(user)).await?;

    info!(user_id = %id, "Account created");
    Ok((StatusCode::CREATED, Json(SignupResponse { id })))
}

/// Issue a bearer token for the principal authenticated by Basic auth.
///
/// # Endpoint
///
/// `GET /v1/login`
pub async fn signin_handler(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state
        .tokens
        .issue(&principal.id, &principal.login, state.token_ttl)?;

    debug!(user_id = %principal.id, "Token issued");
    Ok(Json(TokenResponse { token }))
}

/// Return the caller's account.
///
/// # Endpoint
///
/// `GET /v1/me`
pub async fn get_me_handler(
    ctx: RequestContext,
    principal: Principal,
) -> Result<Json<UserResponse>, ApiError> {
    let user = ctx
        .run(ctx.db.find_by_id(&principal.id))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(UserResponse::from(user)))
}

/// Apply a partial update to the caller's account.
///
/// # Endpoint
///
/// `PUT /v1/me`
///
/// # Response
///
/// - `200 OK`: The updated account
/// - `400 Bad Request`: Malformed body, invalid field, or a password change
///   without a correct `current_password`
/// - `409 Conflict`: The new login belongs to another account
pub async fn update_me_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    principal: Principal,
    body: Result<Json<UpdateMeRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(request) = body.map_err(body_rejection)?;

    if let Some(login) = &request.login {
        validate_login(login)?;
    }
    if let Some(email) = &request.email {
        validate_email(email)?;
    }
    if let Some(password) = &request.password {
        validate_password("password", password)?;
    }

    let mut user = ctx
        .run(ctx.db.find_by_id(&principal.id))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if let Some(password) = request.password {
        let current = request.current_password.ok_or_else(|| {
            ApiError::invalid_field(
                "current_password",
                "current_password is required to change the password",
            )
        })?;

        let stored = Some(user.password_hash.clone());
        let verified = ctx
            .run(async { Ok::<_, ApiError>(state.passwords.verify(current, stored).await) })
            .await?;
        if !verified {
            warn!(user_id = %user.id, "Password change rejected");
            return Err(ApiError::invalid_field(
                "current_password",
                "current_password does not match",
            ));
        }

        user.password_hash = ctx.run(state.passwords.hash(password)).await?;
    }

    if let Some(login) = request.login {
        user.login = login;
    }
    if let Some(name) = request.name {
        user.name = Some(name);
    }
    if let Some(email) = request.email {
        user.email = Some(email);
    }
    user.updated_at = unix_now().max(user.created_at);

    ctx.run(ctx.db.update_user(user.clone())).await?;

    info!(user_id = %user.id, "Account updated");
    Ok(Json(UserResponse::from(user)))
}

// =============================================================================
// Tests
// =============================================================================
