//! Typed per-request values.
//!
//! Middleware attaches values to the request's extensions before calling
//! downstream; handlers read them through extractors:
//!
//! - [`RequestContext`] - database handle, deadline, cancellation signal, request ID
//! - [`Principal`] - the authenticated user, present only behind auth middleware

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::FromRequestParts, http::request::Parts};
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::request_id::RequestId;
use tracing::debug;

use crate::error::ApiError;
use crate::store::{Db, User};

// =============================================================================
// Principal
// =============================================================================

/// The authenticated user for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub login: String,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            login: user.login.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

// =============================================================================
// Client IP
// =============================================================================

/// Client address resolved from proxy headers or the peer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

// =============================================================================
// Cancellation
// =============================================================================

/// Why a request stopped before producing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The client went away
    ClientClosed,

    /// The request deadline elapsed
    DeadlineExceeded,
}

/// Read side of a request's cancellation signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<Option<CancelReason>>,
}

/// Write side of a request's cancellation signal. Only the first reason sticks.
#[derive(Debug, Clone)]
pub struct CancelTrigger {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

/// Create a connected trigger and signal.
pub fn cancellation_pair() -> (CancelTrigger, Cancellation) {
    let (tx, rx) = watch::channel(None);
    (CancelTrigger { tx: Arc::new(tx) }, Cancellation { rx })
}

impl CancelTrigger {
    /// Cancel the request. Returns `false` if it was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    /// The cancellation reason, if the request has been cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the request is cancelled.
    ///
    /// Pends forever if the request completes without being cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        let reason = rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}

// =============================================================================
// Deadline
// =============================================================================

/// The instant by which a request must have produced its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Everything a handler needs from the middleware pipeline.
#[derive(Clone)]
pub struct RequestContext {
    /// Handle scoped to the configured database
    pub db: Db,

    /// Deadline set by the timeout layer
    pub deadline: Option<Deadline>,

    /// Fires on client disconnect or deadline expiry
    pub cancellation: Cancellation,

    /// Value of the `x-request-id` header
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Run a suspending operation, abandoning it if the request is cancelled.
    ///
    /// Nothing is started once the request is cancelled or its deadline has
    /// passed.
    pub async fn run<F, T, E>(&self, operation: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        if let Some(reason) = self.cancellation.reason() {
            return Err(self.abandon(reason));
        }
        if self.deadline.is_some_and(|d| d.remaining().is_zero()) {
            return Err(self.abandon(CancelReason::DeadlineExceeded));
        }

        tokio::select! {
            biased;
            reason = self.cancellation.cancelled() => Err(self.abandon(reason)),
            result = operation => result.map_err(Into::into),
        }
    }

    fn abandon(&self, reason: CancelReason) -> ApiError {
        debug!(
            request_id = self.request_id.as_deref().unwrap_or("-"),
            reason = ?reason,
            remaining_ms = self.deadline.map(|d| d.remaining().as_millis() as u64),
            "Store call abandoned"
        );
        ApiError::Cancelled(reason)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let db = parts
            .extensions
            .get::<Db>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("database handle missing from request".into()))?;

        let cancellation = parts
            .extensions
            .get::<Cancellation>()
            .cloned()
            .unwrap_or_else(Cancellation::never);

        let request_id = parts
            .extensions
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .map(str::to_owned);

        Ok(Self {
            db,
            deadline: parts.extensions.get::<Deadline>().copied(),
            cancellation,
            request_id,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
