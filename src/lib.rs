//! # Account API
//!
//! A small HTTP JSON service for user accounts: signup, password login
//! that issues a signed bearer token, and reading or updating one's own
//! profile.
//!
//! ## Features
//!
//! - **Request-scoped database sessions**: every request gets its own
//!   session, released exactly once however the request ends
//! - **Typed request context**: database handle, deadline, cancellation and
//!   request ID reach handlers through extractors
//! - **Authentication**: HTTP Basic for login, HS256 JWT bearer tokens
//!   for everything else, bcrypt password verifiers
//! - **Deadlines and cancellation**: client disconnects and slow requests
//!   stop in-flight store work
//!
//! ## Architecture
//!
//! - [`config`] - CLI and env-file settings
//! - [`auth`] - token signing, credential parsing, password hashing
//! - [`store`] - store contract, PostgreSQL driver and an in-process test double
//! - [`server`] - Axum middleware pipeline, handlers and routes
//! - [`error`] - error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use account_api::{
//!     create_router, AppState, PasswordHasher, PostgresConnector, SessionPool, TokenSigner,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = PostgresConnector::connect("localhost:5432", "accounts").await.unwrap();
//!     let pool = SessionPool::new(connector, "accounts");
//!     let state = AppState::new(
//!         pool,
//!         TokenSigner::new("secret").unwrap(),
//!         PasswordHasher::new(bcrypt::DEFAULT_COST).unwrap(),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, create_router(state)).await.unwrap();
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use auth::{BasicCredentials, Claims, PasswordHasher, TokenSigner};
pub use config::{Cli, Settings};
pub use error::{ApiError, ConfigError, CredentialsError, StoreError, TokenError};
pub use server::{create_router, AppState, ErrorResponse, Principal, RequestContext};
pub use store::{
    Connector, Db, MemoryConnector, PostgresConnector, ScopedSession, Session, SessionPool,
    SessionStats, User, UserStore,
};
