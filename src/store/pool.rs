//! Per-request session acquisition.
//!
//! [`SessionPool::acquire`] dials a session and derives a handle for the
//! configured database. The returned [`ScopedSession`] releases the session
//! when dropped, which covers every way a request can end: normal return,
//! panic unwinding, deadline expiry and client disconnect (the request
//! future is dropped in the last three).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;

use super::{Connector, Db, Session};

/// Counters describing session usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions successfully acquired
    pub acquired: u64,

    /// Sessions released
    pub released: u64,

    /// Failed acquisition attempts
    pub failed: u64,
}

impl SessionStats {
    /// Sessions currently held by in-flight requests.
    pub fn open(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
}

/// Hands out request-scoped database sessions.
#[derive(Clone)]
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    database: Arc<str>,
    counters: Arc<Counters>,
}

impl SessionPool {
    /// Create a pool dialing through `connector`, scoped to `database`.
    pub fn new(connector: impl Connector, database: impl Into<String>) -> Self {
        Self::from_arc(Arc::new(connector), database)
    }

    /// Create a pool from a shared connector.
    pub fn from_arc(connector: Arc<dyn Connector>, database: impl Into<String>) -> Self {
        let database: String = database.into();
        Self {
            connector,
            database: Arc::from(database),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Name of the database every handle is scoped to.
    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// Acquire a session for one request.
    pub async fn acquire(&self) -> Result<ScopedSession, StoreError> {
        let session = match self.connector.dial().await {
            Ok(session) => session,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let db = session.database(&self.database);
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(database = %self.database, "Database session acquired");

        Ok(ScopedSession {
            db,
            session: Some(session),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

/// A session held for the duration of one request.
pub struct ScopedSession {
    db: Db,
    session: Option<Box<dyn Session>>,
    counters: Arc<Counters>,
}

impl ScopedSession {
    /// The database handle derived from this session.
    pub fn db(&self) -> Db {
        Arc::clone(&self.db)
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            debug!("Database session released");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
