//! PostgreSQL integration tests.
//!
//! These tests run the store and the full router on the PostgreSQL driver.
//! Only the unreachable-server test runs by default; the rest need a live
//! server.
//!
//! # Requirements
//!
//! A PostgreSQL server the tests may create schemas in. Point
//! `ACCOUNT_API_TEST_DB_URL` at it, in the same form as `DB_URL`:
//!
//! ```bash
//! export ACCOUNT_API_TEST_DB_URL=postgres:postgres@localhost:5432/postgres
//! ```
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test integration postgres -- --ignored
//! ```
//!
//! Each live test works in its own schema and drops it afterwards.

use std::env;
use std::time::Duration;

use axum::http::{header, Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use account_api::server::DATABASE_UNAVAILABLE_MESSAGE;
use account_api::store::postgres::connect_options;
use account_api::{
    create_router, AppState, Connector, PasswordHasher, PostgresConnector, SessionPool,
    StoreError, TokenSigner, User,
};

use super::test_utils::{
    authorized_get, basic_header, bearer_header, body_bytes, body_json, json_request, login,
    signup,
    TEST_BCRYPT_COST, TEST_SECRET,
};

/// Environment variable holding the server address
const DB_URL_ENV: &str = "ACCOUNT_API_TEST_DB_URL";

/// Helper to skip test with a message
macro_rules! skip_if {
    ($cond:expr, $msg:expr) => {
        if $cond {
            eprintln!("SKIPPED: {}", $msg);
            return;
        }
    };
}

fn db_url() -> Option<String> {
    env::var(DB_URL_ENV).ok()
}

fn unique_schema() -> String {
    format!("account_api_test_{}", uuid::Uuid::new_v4().simple())
}

async fn drop_schema(db_url: &str, schema: &str) {
    let pool = sqlx::PgPool::connect_with(connect_options(db_url).unwrap())
        .await
        .unwrap();
    sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema))
        .execute(&pool)
        .await
        .unwrap();
}

fn app(connector: PostgresConnector, schema: &str) -> (axum::Router, AppState) {
    let state = AppState::new(
        SessionPool::new(connector, schema),
        TokenSigner::new(TEST_SECRET).unwrap(),
        PasswordHasher::new(TEST_BCRYPT_COST).unwrap(),
    );
    (create_router(state.clone()), state)
}

fn user(id: &str, login: &str) -> User {
    User {
        id: id.to_string(),
        login: login.to_string(),
        password_hash: "$2b$04$hash".to_string(),
        name: Some("Alice".to_string()),
        email: None,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

// =============================================================================
// Unreachable Server
// =============================================================================

#[tokio::test]
async fn test_unreachable_server_gives_database_error() {
    let connector =
        PostgresConnector::connect_lazy("127.0.0.1:1", Duration::from_millis(200)).unwrap();
    let (router, state) = app(connector, "accounts");

    let response = router
        .oneshot(authorized_get("/v1/login", &basic_header("alice", "p@ss")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(
        body_bytes(response).await,
        DATABASE_UNAVAILABLE_MESSAGE.as_bytes()
    );
    assert_eq!(state.pool.stats().failed, 1);
}

// =============================================================================
// Store
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_postgres_unique_login_and_updates() {
    let db_url = db_url();
    skip_if!(db_url.is_none(), format!("{} is not set", DB_URL_ENV));
    let db_url = db_url.unwrap();
    let schema = unique_schema();
    let connector = PostgresConnector::connect(&db_url, &schema).await.unwrap();
    let db = connector.dial().await.unwrap().database(&schema);

    db.insert_user(user("1", "alice")).await.unwrap();
    db.insert_user(user("2", "bob")).await.unwrap();
    assert_eq!(db.count_users().await.unwrap(), 2);

    let duplicate = db.insert_user(user("3", "alice")).await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateLogin(login)) if login == "alice"));

    let found = db.find_by_login("alice").await.unwrap().unwrap();
    assert_eq!(found, user("1", "alice"));
    assert!(db.find_by_login("Alice").await.unwrap().is_none());

    let taken = db.update_user(user("1", "bob")).await;
    assert!(matches!(taken, Err(StoreError::DuplicateLogin(_))));

    let missing = db.update_user(user("9", "carol")).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    db.update_user(user("1", "alice2")).await.unwrap();
    assert_eq!(db.find_by_id("1").await.unwrap().unwrap().login, "alice2");

    drop(db);
    drop_schema(&db_url, &schema).await;
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_postgres_accounts_survive_restart() {
    let db_url = db_url();
    skip_if!(db_url.is_none(), format!("{} is not set", DB_URL_ENV));
    let db_url = db_url.unwrap();
    let schema = unique_schema();

    let id = {
        let connector = PostgresConnector::connect(&db_url, &schema).await.unwrap();
        let (router, _state) = app(connector, &schema);
        signup(&router, "alice", "p@ss").await
    };

    // A fresh connector and router stand in for a restarted process
    let connector = PostgresConnector::connect(&db_url, &schema).await.unwrap();
    let (router, state) = app(connector, &schema);

    let token = login(&router, "alice", "p@ss").await;
    let response = router
        .clone()
        .oneshot(authorized_get("/v1/me", &bearer_header(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], id.as_str());

    let body = json!({ "login": "alice", "password": "other" });
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/signup", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = router
        .clone()
        .oneshot(authorized_get("/v1/login", &basic_header("alice", "wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(state.pool.stats().open(), 0);
    drop_schema(&db_url, &schema).await;
}
