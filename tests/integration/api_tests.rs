//! API integration tests for signup, login and profile management.
//!
//! Tests verify:
//! - The end-to-end account flow
//! - Validation and conflict responses
//! - Response headers and body shapes

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use account_api::create_router;

use super::test_utils::{
    authorized_get, authorized_json, basic_header, bearer_header, body_bytes, body_json,
    json_request, login, memory_app, open_db, signup, test_state, FailingConnector, Fault,
    FaultyConnector, TEST_DB,
};

// =============================================================================
// End-to-End Flow
// =============================================================================

#[tokio::test]
async fn test_signup_stores_hashed_password() {
    let (router, _state, connector) = memory_app();

    let body = json!({ "login": "alice", "password": "p@ss" });
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/signup", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let id = body_json(response).await["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let db = open_db(&connector, TEST_DB).await;
    assert_eq!(db.count_users().await.unwrap(), 1);

    let user = db.find_by_login("alice").await.unwrap().unwrap();
    assert_eq!(user.id, id);
    assert_ne!(user.password_hash, "p@ss");
    assert!(user.password_hash.starts_with("$2"));
}

#[tokio::test]
async fn test_login_issues_three_segment_token() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/login", "Basic YWxpY2U6cEBzcw=="))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(token.split('.').count(), 3);
}

#[tokio::test]
async fn test_get_me_returns_record_without_password() {
    let (router, _state, _connector) = memory_app();
    let id = signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(!text.contains("password"));
    assert!(!text.contains("$2"));

    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["login"], "alice");
    assert!(body["created_at"].as_u64().is_some());
}

#[tokio::test]
async fn test_login_change_moves_credentials() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "login": "alice2" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["login"], "alice2");

    let old = router
        .clone()
        .oneshot(authorized_get("/v1/login", &basic_header("alice", "p@ss")))
        .await
        .unwrap();
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    let new = router
        .clone()
        .oneshot(authorized_get("/v1/login", &basic_header("alice2", "p@ss")))
        .await
        .unwrap();
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_update_profile_fields() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "name": "Alice", "email": "alice@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "Alice");
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["login"], "alice");
    assert!(body.get("password_hash").is_none());
}

// =============================================================================
// Password Change
// =============================================================================

#[tokio::test]
async fn test_password_change_requires_current_password() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "password": "n3w" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "current_password");
}

#[tokio::test]
async fn test_password_change_rejects_wrong_current_password() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "password": "n3w", "current_password": "wrong" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["field"], "current_password");
    assert!(!body.to_string().contains("wrong"));

    // The old password still works
    login(&router, "alice", "p@ss").await;
}

#[tokio::test]
async fn test_password_change_succeeds() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "password": "n3w", "current_password": "p@ss" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let old = router
        .clone()
        .oneshot(authorized_get("/v1/login", &basic_header("alice", "p@ss")))
        .await
        .unwrap();
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    login(&router, "alice", "n3w").await;
}

// =============================================================================
// Conflicts
// =============================================================================

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;

    let body = json!({ "login": "alice", "password": "other" });
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/signup", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_concurrent_duplicate_signups_create_one_user() {
    let (router, _state, connector) = memory_app();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            let body = json!({ "login": "racer", "password": "p@ss" });
            router
                .oneshot(json_request(Method::POST, "/v1/signup", &body))
                .await
                .unwrap()
                .status()
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);

    let db = open_db(&connector, TEST_DB).await;
    assert_eq!(db.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_login_change_to_taken_login_conflicts() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    signup(&router, "bob", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "login": "bob" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    login(&router, "alice", "p@ss").await;
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_signup_validation_errors() {
    let (router, _state, connector) = memory_app();

    let cases = [
        (json!({ "login": "", "password": "p@ss" }), "login"),
        (json!({ "login": "has space", "password": "p@ss" }), "login"),
        (json!({ "login": "a:b", "password": "p@ss" }), "login"),
        (json!({ "login": "alice", "password": "" }), "password"),
        (
            json!({ "login": "alice", "password": "p@ss", "email": "nope" }),
            "email",
        ),
    ];

    for (body, field) in cases {
        let response = router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/signup", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(body_json(response).await["field"], field);
    }

    let db = open_db(&connector, TEST_DB).await;
    assert_eq!(db.count_users().await.unwrap(), 0);
}

#[tokio::test]
async fn test_signup_malformed_body() {
    let (router, _state, _connector) = memory_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    let missing_password = json!({ "login": "alice" });
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/signup", &missing_password))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_rejects_unknown_fields() {
    let (router, _state, _connector) = memory_app();
    signup(&router, "alice", "p@ss").await;
    let token = login(&router, "alice", "p@ss").await;

    let response = router
        .clone()
        .oneshot(authorized_json(
            Method::PUT,
            "/v1/me",
            &bearer_header(&token),
            &json!({ "password_hash": "$2b$04$forged" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Headers
// =============================================================================

#[tokio::test]
async fn test_all_routes_are_no_store() {
    let (router, _state, _connector) = memory_app();

    let body = json!({ "login": "alice", "password": "p@ss" });
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/signup", &body))
        .await
        .unwrap();
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/login", &basic_header("alice", "p@ss")))
        .await
        .unwrap();
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let token = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

    // Rejections from the auth layer too
    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", "Bearer nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

    // Responses the pipeline answers before any route runs
    let offline = create_router(test_state(FailingConnector));
    for uri in ["/v1/login", "/v1/me"] {
        let response = offline
            .clone()
            .oneshot(authorized_get(uri, &basic_header("alice", "p@ss")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    }

    let slow = create_router(
        test_state(FaultyConnector::new(Fault::Delay(Duration::from_secs(30))))
            .with_request_timeout(Duration::from_millis(200)),
    );
    signup(&slow, "alice", "p@ss").await;
    let token = login(&slow, "alice", "p@ss").await;
    let response = slow
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

    let panicking = create_router(test_state(FaultyConnector::new(Fault::Panic)));
    signup(&panicking, "alice", "p@ss").await;
    let token = login(&panicking, "alice", "p@ss").await;
    let response = panicking
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (router, _state, _connector) = memory_app();

    let request = Request::builder()
        .uri("/v1/nope")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
}
