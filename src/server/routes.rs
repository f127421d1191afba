//! Router configuration for the account API.
//!
//! # Route Structure
//!
//! ```text
//! POST /v1/signup    - Create an account (public)
//! GET  /v1/login     - Issue a bearer token (Basic auth)
//! GET  /v1/me        - Read own account (Bearer auth)
//! PUT  /v1/me        - Update own account (Bearer auth)
//! ```
//!
//! Every response carries `Cache-Control: no-store`, including the ones
//! the pipeline produces itself (database unavailable, deadline, panic).
//!
//! # Example
//!
//! ```ignore
//! use account_api::server::{create_router, AppState};
//!
//! let state = AppState::new(pool, signer, hasher);
//! let router = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::CACHE_CONTROL;
use http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::auth::{basic_auth, bearer_auth};
use super::handlers::{
    get_me_handler, signin_handler, signup_handler, update_me_handler, AppState,
};
use super::middleware::{
    cancel_on_disconnect, database_scope, enforce_deadline, handle_panic, make_request_span,
    resolve_client_ip,
};

/// Create the main application router.
///
/// Requests pass through the infrastructure pipeline in this order
/// (outermost first):
///
/// 1. request ID (generated if absent, echoed on the response)
/// 2. `Cache-Control: no-store`
/// 3. real client IP
/// 4. access log
/// 5. panic recovery
/// 6. database session scope
/// 7. client-disconnect cancellation
/// 8. request deadline
///
/// Authentication is applied per route after that.
pub fn create_router(state: AppState) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(middleware::from_fn(resolve_client_ip))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(
            state.pool.clone(),
            database_scope,
        ))
        .layer(middleware::from_fn(cancel_on_disconnect))
        .layer(middleware::from_fn_with_state(
            state.request_timeout,
            enforce_deadline,
        ));

    let signup_routes = Router::new().route("/v1/signup", post(signup_handler));

    let login_routes = Router::new()
        .route("/v1/login", get(signin_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    let me_routes = Router::new()
        .route("/v1/me", get(get_me_handler).put(update_me_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    Router::new()
        .merge(signup_routes)
        .merge(login_routes)
        .merge(me_routes)
        .with_state(state)
        .layer(pipeline)
}
