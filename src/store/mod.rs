//! Document store abstraction.
//!
//! The API never talks to a database driver directly. It consumes a small
//! contract made of three traits:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     SessionPool (per-request scoping)   │
//! └────────────────────┬────────────────────┘
//!                      │ acquire()
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   Connector  ──dial()──▶  Session       │
//! └────────────────────┬────────────────────┘
//!                      │ database(name)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │      UserStore (the user collection)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! [`PostgresConnector`] implements the contract on PostgreSQL and backs
//! the binary. [`MemoryConnector`] is an in-process implementation used as
//! a test double.

mod memory;
mod pool;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::MemoryConnector;
pub use pool::{ScopedSession, SessionPool, SessionStats};
pub use postgres::PostgresConnector;

// =============================================================================
// User Record
// =============================================================================

/// A persisted user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable opaque identifier
    pub id: String,

    /// Unique login name (compared exactly)
    pub login: String,

    /// bcrypt verifier, never the plaintext password
    pub password_hash: String,

    /// Display name
    pub name: Option<String>,

    /// Contact email
    pub email: Option<String>,

    /// Creation time (Unix epoch seconds)
    pub created_at: u64,

    /// Last update time (Unix epoch seconds)
    pub updated_at: u64,
}

// =============================================================================
// Driver Contract
// =============================================================================

/// Handle to the user collection of one database.
pub type Db = Arc<dyn UserStore>;

/// Opens sessions against a database deployment.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial a new session.
    async fn dial(&self) -> Result<Box<dyn Session>, StoreError>;
}

/// A live session. Dropping it releases the underlying connection.
pub trait Session: Send + Sync {
    /// Derive a handle scoped to the named database.
    fn database(&self, name: &str) -> Db;
}

/// Operations on the user collection.
///
/// Implementations enforce a unique index on `login`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Name of the database this handle is scoped to.
    fn database_name(&self) -> &str;

    /// Insert a new user, failing with `DuplicateLogin` if the login is taken.
    async fn insert_user(&self, user: User) -> Result<(), StoreError>;

    /// Find a user by exact login.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    /// Find a user by identifier.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Replace an existing user record.
    ///
    /// Fails with `NotFound` if the id is unknown and `DuplicateLogin` if the
    /// new login belongs to another user.
    async fn update_user(&self, user: User) -> Result<(), StoreError>;

    /// Number of users in the collection.
    async fn count_users(&self) -> Result<usize, StoreError>;
}
