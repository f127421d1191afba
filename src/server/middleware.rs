//! Infrastructure middleware shared by every route.
//!
//! The functions here are composed in a fixed order by
//! [`super::routes::create_router`]:
//!
//! ```text
//! request id ─▶ real ip ─▶ access log ─▶ panic recovery ─▶ database scope
//!            ─▶ disconnect cancellation ─▶ deadline ─▶ routes
//! ```

use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, info_span, warn, Span};

use crate::error::ApiError;
use crate::store::SessionPool;

use super::context::{cancellation_pair, CancelReason, CancelTrigger, ClientIp, Deadline};
use super::handlers::ErrorResponse;

/// Body sent when no database session can be acquired.
pub const DATABASE_UNAVAILABLE_MESSAGE: &str = "Unable to connect to database";

/// Proxy headers consulted for the client address, in priority order.
const SINGLE_IP_HEADERS: [&str; 2] = ["true-client-ip", "x-real-ip"];

// =============================================================================
// Real IP
// =============================================================================

/// Resolve the client address from trusted proxy headers.
///
/// Checks `True-Client-IP`, then `X-Real-IP`, then the first entry of
/// `X-Forwarded-For`, and finally the peer address.
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    for name in SINGLE_IP_HEADERS {
        if let Some(ip) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
        {
            return Some(ip);
        }
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

/// Attach a [`ClientIp`] to the request when an address can be resolved.
pub async fn resolve_client_ip(mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = client_ip_from_headers(request.headers()).or(peer) {
        request.extensions_mut().insert(ClientIp(ip));
    }

    next.run(request).await
}

// =============================================================================
// Access Log
// =============================================================================

/// Build the span every request is logged under.
pub fn make_request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let client_ip = request
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| ip.to_string())
        .unwrap_or_else(|| "-".to_string());

    info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
        client_ip = %client_ip,
    )
}

// =============================================================================
// Panic Recovery
// =============================================================================

/// Turn a handler panic into a 500 response.
///
/// Runs inside the request span, so the log line carries the request ID.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal server error")),
    )
        .into_response()
}

// =============================================================================
// Database Scope
// =============================================================================

/// Acquire a database session for the request and release it afterwards.
///
/// The session guard lives in this frame, so it is released when the
/// downstream future completes, unwinds, or is dropped.
pub async fn database_scope(
    State(pool): State<SessionPool>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "DB connect error");
            return (StatusCode::INTERNAL_SERVER_ERROR, DATABASE_UNAVAILABLE_MESSAGE)
                .into_response();
        }
    };

    request.extensions_mut().insert(session.db());
    let response = next.run(request).await;
    drop(session);
    response
}

// =============================================================================
// Cancellation
// =============================================================================

/// Fires `ClientClosed` if dropped while still armed.
struct DisconnectGuard {
    trigger: Option<CancelTrigger>,
}

impl DisconnectGuard {
    fn disarm(mut self) {
        self.trigger = None;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            if trigger.cancel(CancelReason::ClientClosed) {
                debug!("Client went away before the response was ready");
            }
        }
    }
}

/// Give the request a cancellation signal that fires if the client
/// disconnects.
///
/// hyper drops the request future when the connection closes; the guard
/// notices the drop and cancels the signal for any work still observing it.
pub async fn cancel_on_disconnect(mut request: Request, next: Next) -> Response {
    let (trigger, cancellation) = cancellation_pair();
    request.extensions_mut().insert(trigger.clone());
    request.extensions_mut().insert(cancellation);

    let guard = DisconnectGuard {
        trigger: Some(trigger),
    };
    let response = next.run(request).await;
    guard.disarm();
    response
}

// =============================================================================
// Deadline
// =============================================================================

/// Bound the request by `timeout`, answering 504 when it elapses.
pub async fn enforce_deadline(
    State(timeout): State<Duration>,
    mut request: Request,
    next: Next,
) -> Response {
    let trigger = request.extensions().get::<CancelTrigger>().cloned();
    request.extensions_mut().insert(Deadline::after(timeout));

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            if let Some(trigger) = trigger {
                trigger.cancel(CancelReason::DeadlineExceeded);
            }
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Request deadline exceeded"
            );
            ApiError::Cancelled(CancelReason::DeadlineExceeded).into_response()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
