//! PostgreSQL-backed user store.
//!
//! Each named database maps to a PostgreSQL schema holding one `users`
//! table. The login column carries a unique constraint, so duplicate
//! logins are rejected by the server even under concurrent signups.
//!
//! ## Addressing
//!
//! `DB_URL` is either a full `postgres://` URL or the part after the
//! scheme: `[user[:password]@]host[:port][/database]`.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | Database, code `23505` on `users_login_key` | `DuplicateLogin` |
//! | Io, Tls, PoolTimedOut, PoolClosed | `Unavailable` |
//! | anything else | `Backend` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

use super::{Connector, Db, Session, User, UserStore};

/// Maximum pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long `dial` waits for a connection before reporting the database unavailable.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the unique constraint on `users.login`.
const LOGIN_CONSTRAINT: &str = "users_login_key";

const UNIQUE_VIOLATION: &str = "23505";

// =============================================================================
// Connector
// =============================================================================

/// Connector backed by a PostgreSQL connection pool.
///
/// Every dialed session holds one pooled connection until it is dropped.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    pool: PgPool,
}

impl PostgresConnector {
    /// Connect to `db_url` and make sure the user table of `database` exists.
    ///
    /// Fails with `Unavailable` when the server cannot be reached.
    pub async fn connect(db_url: &str, database: &str) -> Result<Self, StoreError> {
        let connector = Self::connect_lazy(db_url, DEFAULT_ACQUIRE_TIMEOUT)?;
        connector.ensure_collection(database).await?;
        Ok(connector)
    }

    /// Build a connector without touching the server.
    ///
    /// Connections are opened on demand; `dial` gives up after `acquire_timeout`.
    pub fn connect_lazy(db_url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let options = connect_options(db_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }

    /// Create the schema and user table for `database` if missing.
    pub async fn ensure_collection(&self, database: &str) -> Result<(), StoreError> {
        let schema = quote_ident(database);

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {}.users (
                id TEXT PRIMARY KEY,
                login TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                name TEXT,
                email TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                CONSTRAINT {} UNIQUE (login)
            )
            "#,
            schema, LOGIN_CONSTRAINT
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        info!(database = %database, "User collection ready");
        Ok(())
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn dial(&self) -> Result<Box<dyn Session>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        Ok(Box::new(PostgresSession {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// Parse `db_url`, adding the `postgres://` scheme when it is missing.
pub fn connect_options(db_url: &str) -> Result<PgConnectOptions, StoreError> {
    let url = if db_url.contains("://") {
        db_url.to_string()
    } else {
        format!("postgres://{}", db_url)
    };
    PgConnectOptions::from_str(&url)
        .map_err(|e| StoreError::Backend(format!("invalid database url: {}", e)))
}

/// `host:port` of `db_url`, without credentials, for logging.
pub fn server_address(db_url: &str) -> String {
    match connect_options(db_url) {
        Ok(options) => format!("{}:{}", options.get_host(), options.get_port()),
        Err(_) => "<invalid url>".to_string(),
    }
}

struct PostgresSession {
    conn: Arc<Mutex<PoolConnection<Postgres>>>,
}

impl Session for PostgresSession {
    fn database(&self, name: &str) -> Db {
        Arc::new(PostgresDatabase::new(name, Arc::clone(&self.conn)))
    }
}

// =============================================================================
// User Collection
// =============================================================================

struct PostgresDatabase {
    name: String,
    conn: Arc<Mutex<PoolConnection<Postgres>>>,
    statements: Statements,
}

struct Statements {
    insert: String,
    find_by_login: String,
    find_by_id: String,
    update: String,
    count: String,
}

impl Statements {
    fn for_schema(schema: &str) -> Self {
        let columns = "id, login, password_hash, name, email, created_at, updated_at";
        Self {
            insert: format!(
                "INSERT INTO {}.users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                schema, columns
            ),
            find_by_login: format!("SELECT {} FROM {}.users WHERE login = $1", columns, schema),
            find_by_id: format!("SELECT {} FROM {}.users WHERE id = $1", columns, schema),
            update: format!(
                "UPDATE {}.users SET login = $2, password_hash = $3, name = $4, email = $5, \
                 updated_at = $6 WHERE id = $1",
                schema
            ),
            count: format!("SELECT COUNT(*) FROM {}.users", schema),
        }
    }
}

impl PostgresDatabase {
    fn new(name: &str, conn: Arc<Mutex<PoolConnection<Postgres>>>) -> Self {
        Self {
            name: name.to_string(),
            conn,
            statements: Statements::for_schema(&quote_ident(name)),
        }
    }

    async fn find_one(&self, sql: &str, key: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;

        row.map(|row| {
            UserRow::from_row(&row)
                .map(User::from)
                .map_err(|e| StoreError::Backend(format!("failed to decode user row: {}", e)))
        })
        .transpose()
    }
}

#[async_trait]
impl UserStore for PostgresDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        sqlx::query(&self.statements.insert)
            .bind(&user.id)
            .bind(&user.login)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.created_at as i64)
            .bind(user.updated_at as i64)
            .execute(&mut **conn)
            .await
            .map_err(|e| {
                if is_login_violation(&e) {
                    StoreError::DuplicateLogin(user.login.clone())
                } else {
                    map_sqlx_error("insert_user", e)
                }
            })?;

        debug!(user_id = %user.id, "User inserted");
        Ok(())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        self.find_one(&self.statements.find_by_login, login).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find_one(&self.statements.find_by_id, id).await
    }

    async fn update_user(&self, user: User) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let result = sqlx::query(&self.statements.update)
            .bind(&user.id)
            .bind(&user.login)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.updated_at as i64)
            .execute(&mut **conn)
            .await
            .map_err(|e| {
                if is_login_violation(&e) {
                    StoreError::DuplicateLogin(user.login.clone())
                } else {
                    map_sqlx_error("update_user", e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user.id));
        }
        Ok(())
    }

    async fn count_users(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().await;
        let count: i64 = sqlx::query_scalar(&self.statements.count)
            .fetch_one(&mut **conn)
            .await
            .map_err(|e| map_sqlx_error("count_users", e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

// =============================================================================
// Rows and Errors
// =============================================================================

struct UserRow {
    id: String,
    login: String,
    password_hash: String,
    name: Option<String>,
    email: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            login: row.try_get("login")?,
            password_hash: row.try_get("password_hash")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            login: row.login,
            password_hash: row.password_hash,
            name: row.name,
            email: row.email,
            created_at: row.created_at.max(0) as u64,
            updated_at: row.updated_at.max(0) as u64,
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{} failed: {}", operation, err))
        }
        _ => StoreError::Backend(format!("{} failed: {}", operation, err)),
    }
}

/// Whether `err` is a unique violation of the login constraint.
fn is_login_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint() == Some(LOGIN_CONSTRAINT)
        }
        _ => false,
    }
}

/// Quote a schema name as a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// Tests
// =============================================================================
