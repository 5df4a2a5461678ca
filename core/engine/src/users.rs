//! User registry.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use encryptall_common::{FsPath, Result, UserId};
use encryptall_storage::FileTree;

/// One source of user accounts.
#[async_trait]
pub trait UserBackend: Send + Sync {
    /// Backend name used in log messages.
    fn name(&self) -> &str;

    /// All users this backend knows.
    async fn users(&self) -> Result<Vec<UserId>>;

    /// E-mail address of `user`, if known.
    async fn email(&self, user: &UserId) -> Result<Option<String>>;
}

/// Aggregates every configured backend.
#[derive(Default)]
pub struct UserManager {
    backends: Vec<Arc<dyn UserBackend>>,
}

impl UserManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Earlier backends win for e-mail lookups.
    pub fn register(&mut self, backend: Arc<dyn UserBackend>) {
        self.backends.push(backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn UserBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Names of the registered backends.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Users of all backends, deduplicated, in first-seen order.
    ///
    /// A failing backend is logged and skipped.
    pub async fn users(&self) -> Vec<UserId> {
        let mut seen = HashSet::new();
        let mut users = Vec::new();

        for backend in &self.backends {
            match backend.users().await {
                Ok(found) => {
                    for user in found {
                        if seen.insert(user.clone()) {
                            users.push(user);
                        }
                    }
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to enumerate users");
                }
            }
        }

        users
    }

    /// E-mail address of `user` from the first backend that has one.
    pub async fn email(&self, user: &UserId) -> Option<String> {
        for backend in &self.backends {
            match backend.email(user).await {
                Ok(Some(address)) if !address.trim().is_empty() => return Some(address),
                Ok(_) => {}
                Err(e) => {
                    warn!(backend = backend.name(), user = %user, error = %e, "E-mail lookup failed");
                }
            }
        }
        None
    }
}

/// Fixed list of users, e.g. from configuration.
pub struct StaticUserBackend {
    name: String,
    users: Vec<UserId>,
    emails: HashMap<UserId, String>,
}

impl StaticUserBackend {
    pub fn new(name: impl Into<String>, users: Vec<UserId>) -> Self {
        Self {
            name: name.into(),
            users,
            emails: HashMap::new(),
        }
    }

    pub fn with_email(mut self, user: UserId, address: impl Into<String>) -> Self {
        self.emails.insert(user, address.into());
        self
    }
}

#[async_trait]
impl UserBackend for StaticUserBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        Ok(self.users.clone())
    }

    async fn email(&self, user: &UserId) -> Result<Option<String>> {
        Ok(self.emails.get(user).cloned())
    }
}

/// Users discovered from the file tree: every top-level directory that
/// holds a `files` directory.
pub struct TreeUserBackend {
    tree: Arc<dyn FileTree>,
    emails: HashMap<UserId, String>,
}

impl TreeUserBackend {
    pub fn new(tree: Arc<dyn FileTree>) -> Self {
        Self {
            tree,
            emails: HashMap::new(),
        }
    }

    pub fn with_emails(mut self, emails: HashMap<UserId, String>) -> Self {
        self.emails = emails;
        self
    }
}

#[async_trait]
impl UserBackend for TreeUserBackend {
    fn name(&self) -> &str {
        "tree"
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        let mut users = Vec::new();
        for node in self.tree.list_directory(&FsPath::root()).await? {
            if !node.is_directory() {
                continue;
            }
            let Ok(user) = UserId::new(node.name.clone()) else {
                continue;
            };
            if self.tree.is_directory(&FsPath::user_files_root(&user)).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn email(&self, user: &UserId) -> Result<Option<String>> {
        Ok(self.emails.get(user).cloned())
    }
}
