//! In-process document store for tests.
//!
//! Databases are created on first use and live as long as the connector,
//! so nothing survives the process. Each database holds one user
//! collection with a unique index on login.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::{Connector, Db, Session, User, UserStore};

/// Connector for the in-process store.
///
/// Clones share the same databases.
#[derive(Clone)]
pub struct MemoryConnector {
    url: Arc<str>,
    cluster: Arc<Cluster>,
}

struct Cluster {
    online: AtomicBool,
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
}

impl Cluster {
    fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        let mut databases = self
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryDatabase::new(name))),
        )
    }
}

impl MemoryConnector {
    /// Create a connector for the deployment at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: Arc::from(url),
            cluster: Arc::new(Cluster {
                online: AtomicBool::new(true),
                databases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Mark the deployment reachable or unreachable for new sessions.
    pub fn set_online(&self, online: bool) {
        self.cluster.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn dial(&self) -> Result<Box<dyn Session>, StoreError> {
        if self.url.is_empty() {
            return Err(StoreError::Unavailable("empty database url".to_string()));
        }
        if !self.cluster.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} is unreachable",
                self.url
            )));
        }
        Ok(Box::new(MemorySession {
            cluster: Arc::clone(&self.cluster),
        }))
    }
}

struct MemorySession {
    cluster: Arc<Cluster>,
}

impl Session for MemorySession {
    fn database(&self, name: &str) -> Db {
        self.cluster.database(name)
    }
}

// =============================================================================
// User Collection
// =============================================================================

struct MemoryDatabase {
    name: String,
    users: RwLock<Users>,
}

#[derive(Default)]
struct Users {
    by_id: HashMap<String, User>,
    /// login -> id
    login_index: HashMap<String, String>,
}

impl MemoryDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: RwLock::new(Users::default()),
        }
    }
}

#[async_trait]
impl UserStore for MemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.login_index.contains_key(&user.login) {
            return Err(StoreError::DuplicateLogin(user.login));
        }
        if users.by_id.contains_key(&user.id) {
            return Err(StoreError::Backend(format!("duplicate id {}", user.id)));
        }
        users
            .login_index
            .insert(user.login.clone(), user.id.clone());
        users.by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .login_index
            .get(login)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.by_id.get(id).cloned())
    }

    async fn update_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let previous_login = match users.by_id.get(&user.id) {
            Some(existing) => existing.login.clone(),
            None => return Err(StoreError::NotFound(user.id)),
        };

        if previous_login != user.login {
            if users.login_index.contains_key(&user.login) {
                return Err(StoreError::DuplicateLogin(user.login));
            }
            users.login_index.remove(&previous_login);
            users
                .login_index
                .insert(user.login.clone(), user.id.clone());
        }

        users.by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn count_users(&self) -> Result<usize, StoreError> {
        Ok(self.users.read().await.by_id.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
