//! Middleware pipeline integration tests.
//!
//! Tests verify:
//! - Database sessions are scoped to one request and always released
//! - Database outages, panics and deadlines map to the right responses
//! - Request IDs are generated and echoed

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use account_api::create_router;
use account_api::server::DATABASE_UNAVAILABLE_MESSAGE;

use super::test_utils::{
    authorized_get, bearer_header, body_bytes, body_json, json_request, login, memory_app,
    open_db, signup, test_state, FailingConnector, Fault, FaultyConnector, TEST_DB,
};

// =============================================================================
// Database Scope
// =============================================================================

#[tokio::test]
async fn test_database_unavailable() {
    let state = test_state(FailingConnector);
    let router = create_router(state.clone());

    let body = json!({ "login": "alice", "password": "p@ss" });
    let response = router
        .oneshot(json_request(Method::POST, "/v1/signup", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    assert_eq!(
        body_bytes(response).await,
        DATABASE_UNAVAILABLE_MESSAGE.as_bytes()
    );

    let stats = state.pool.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.acquired, 0);
}

#[tokio::test]
async fn test_database_unavailable_before_auth() {
    let router = create_router(test_state(FailingConnector));

    // Even an unauthenticated request gets the database error first
    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_session_per_request_released() {
    let (router, state, _connector) = memory_app();

    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;
    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = state.pool.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.released, 3);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_session_released_after_client_error() {
    let (router, state, _connector) = memory_app();

    let response = router
        .oneshot(authorized_get("/v1/login", "Basic !!!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let stats = state.pool.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_handle_scoped_to_configured_database() {
    let (router, state, connector) = memory_app();
    assert_eq!(state.pool.database_name(), TEST_DB);

    let id = signup(&router, "alice", "p@ss").await;

    let scoped = open_db(&connector, TEST_DB).await;
    assert_eq!(scoped.find_by_id(&id).await.unwrap().unwrap().login, "alice");

    let other = open_db(&connector, "other").await;
    assert!(other.find_by_id(&id).await.unwrap().is_none());
}

// =============================================================================
// Panic Recovery
// =============================================================================

#[tokio::test]
async fn test_panic_becomes_500_and_releases_session() {
    let state = test_state(FaultyConnector::new(Fault::Panic));
    let router = create_router(state.clone());

    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        body_json(response).await,
        json!({ "error": "internal server error" })
    );

    let stats = state.pool.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.open(), 0);

    // The server keeps serving after a panic
    login(&router, "alice", "p@ss").await;
}

// =============================================================================
// Deadline and Cancellation
// =============================================================================

#[tokio::test]
async fn test_slow_request_times_out() {
    let state = test_state(FaultyConnector::new(Fault::Delay(Duration::from_secs(30))))
        .with_request_timeout(Duration::from_millis(200));
    let router = create_router(state.clone());

    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let started = std::time::Instant::now();
    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "request timed out" })
    );

    let stats = state.pool.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_client_disconnect_releases_session() {
    let state = test_state(FaultyConnector::new(Fault::Delay(Duration::from_secs(30))));
    let router = create_router(state.clone());

    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    // Dropping the in-flight future is what a closed connection looks like
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        router
            .clone()
            .oneshot(authorized_get("/v1/me", &bearer_header(&token))),
    )
    .await;
    assert!(result.is_err(), "no response may be produced");

    let stats = state.pool.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.released, 3);
}

// =============================================================================
// Request ID
// =============================================================================

#[tokio::test]
async fn test_request_id_generated() {
    let (router, _state, _connector) = memory_app();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let id = response.headers().get("x-request-id").unwrap();
    assert!(!id.is_empty());
}

#[tokio::test]
async fn test_request_id_echoed() {
    let (router, _state, _connector) = memory_app();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/me")
                .header("x-request-id", "trace-me-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-me-123"
    );
}
