//! Authentication middleware.
//!
//! - [`basic_auth`] guards the login route: `Authorization: Basic base64(login:password)`
//! - [`bearer_auth`] guards the profile routes: `Authorization: Bearer <token>`
//!
//! Both attach a [`Principal`] to the request on success and answer 401
//! otherwise. Neither ever echoes the submitted secret.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//! use account_api::server::auth::bearer_auth;
//!
//! let app = Router::new()
//!     .route("/v1/me", get(get_me_handler))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth));
//! ```

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use crate::auth::{bearer_token, BasicCredentials};
use crate::error::{ApiError, CredentialsError, TokenError};

use super::context::{Principal, RequestContext};
use super::handlers::{AppState, ErrorResponse};

/// `WWW-Authenticate` value sent with Basic rejections.
pub const BASIC_CHALLENGE: &str = "Basic realm=\"api\"";

// =============================================================================
// Errors
// =============================================================================

/// Reasons the auth middleware refuses a request.
#[derive(Debug)]
pub enum AuthError {
    /// Basic credentials absent or malformed
    MissingCredentials(CredentialsError),

    /// Unknown login or wrong password
    InvalidCredentials,

    /// No usable `Bearer` header
    MissingToken,

    /// The bearer token failed validation
    InvalidToken(TokenError),

    /// The token names a user that no longer exists
    UnknownPrincipal,

    /// The user lookup itself failed
    Lookup(ApiError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingCredentials(e) => write!(f, "Missing credentials: {}", e),
            AuthError::InvalidCredentials => write!(f, "Invalid login or password"),
            AuthError::MissingToken => write!(f, "Missing bearer token"),
            AuthError::InvalidToken(e) => write!(f, "Invalid token: {}", e),
            AuthError::UnknownPrincipal => write!(f, "Token subject no longer exists"),
            AuthError::Lookup(e) => write!(f, "User lookup failed: {}", e),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let challenge = match self {
            AuthError::Lookup(e) => return e.into_response(),
            AuthError::MissingCredentials(_) | AuthError::InvalidCredentials => true,
            _ => false,
        };

        // Bad signatures and wrong passwords are worth a warning
        match &self {
            AuthError::InvalidToken(TokenError::InvalidSignature)
            | AuthError::InvalidCredentials => {
                warn!(status = 401, "Authentication failed: {}", self);
            }
            _ => {
                debug!(status = 401, "Authentication failed: {}", self);
            }
        }

        let mut response = (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("unauthorized")),
        )
            .into_response();

        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_CHALLENGE),
            );
        }
        response
    }
}

// =============================================================================
// Basic Auth
// =============================================================================

/// Authenticate with login and password, attaching the principal.
pub async fn basic_auth(
    State(state): State<AppState>,
    ctx: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let credentials =
        BasicCredentials::from_headers(request.headers()).map_err(AuthError::MissingCredentials)?;

    let user = ctx
        .run(ctx.db.find_by_login(&credentials.login))
        .await
        .map_err(AuthError::Lookup)?;

    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let verified = ctx
        .run(async {
            Ok::<_, ApiError>(state.passwords.verify(credentials.password, stored_hash).await)
        })
        .await
        .map_err(AuthError::Lookup)?;

    let user = match user {
        Some(user) if verified => user,
        _ => return Err(AuthError::InvalidCredentials),
    };

    debug!(user_id = %user.id, "Basic authentication succeeded");
    request.extensions_mut().insert(Principal::from(&user));
    Ok(next.run(request).await)
}

// =============================================================================
// Bearer Auth
// =============================================================================

/// Authenticate with a bearer token, attaching the principal.
pub async fn bearer_auth(
    State(state): State<AppState>,
    ctx: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let claims = state.tokens.parse(token).map_err(AuthError::InvalidToken)?;

    let user = ctx
        .run(ctx.db.find_by_id(&claims.sub))
        .await
        .map_err(AuthError::Lookup)?
        .ok_or(AuthError::UnknownPrincipal)?;

    debug!(user_id = %user.id, "Bearer authentication succeeded");
    request.extensions_mut().insert(Principal::from(&user));
    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
