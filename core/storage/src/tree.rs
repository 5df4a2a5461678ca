//! Filesystem view trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use encryptall_common::{FsPath, Result, UserId};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

/// What backs a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageKind {
    /// The user's own home storage.
    Home,
    /// Another user's storage mounted into this namespace as an incoming share.
    IncomingShare {
        /// Owner of the shared data, when the backend can tell.
        owner: Option<UserId>,
    },
    /// External storage mounted by the user; its files are the user's to encrypt.
    External,
}

/// Handle identifying the storage a node lives on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHandle {
    /// Backend-specific storage identifier (e.g. `home::alice`).
    pub id: String,
    /// Storage type.
    pub kind: StorageKind,
}

impl StorageHandle {
    /// Home storage of `user`.
    pub fn home(user: &UserId) -> Self {
        Self {
            id: format!("home::{}", user),
            kind: StorageKind::Home,
        }
    }

    /// Storage for a share mounted at `mount_point`.
    pub fn incoming_share(mount_point: &FsPath, owner: Option<UserId>) -> Self {
        Self {
            id: format!("shared::{}", mount_point),
            kind: StorageKind::IncomingShare { owner },
        }
    }

    /// Capability check: is this a shared storage the walking user does not own?
    pub fn is_foreign_share(&self) -> bool {
        matches!(self.kind, StorageKind::IncomingShare { .. })
    }
}

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Full namespace path.
    pub path: FsPath,
    /// Entry name (last path component).
    pub name: String,
    /// File or directory.
    pub kind: NodeKind,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Storage backing this entry.
    pub storage: StorageHandle,
}

impl FileNode {
    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Rooted filesystem view spanning all users.
///
/// Implementations must handle their own locking; the engine calls them
/// from one task at a time.
#[async_trait]
pub trait FileTree: Send + Sync {
    /// Backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// List the immediate children of a directory.
    ///
    /// # Errors
    /// - Path not found
    /// - Path is not a directory
    async fn list_directory(&self, path: &FsPath) -> Result<Vec<FileNode>>;

    /// Whether `path` exists and is a directory. Missing paths are not directories.
    async fn is_directory(&self, path: &FsPath) -> Result<bool>;

    /// Storage backing `path`.
    ///
    /// # Errors
    /// - Path not found
    async fn storage(&self, path: &FsPath) -> Result<StorageHandle>;

    /// Check if a path exists.
    async fn exists(&self, path: &FsPath) -> Result<bool>;

    /// Read a whole file.
    async fn read(&self, path: &FsPath) -> Result<Vec<u8>>;

    /// Read at most `len` leading bytes of a file.
    async fn read_head(&self, path: &FsPath, len: usize) -> Result<Vec<u8>> {
        let mut data = self.read(path).await?;
        data.truncate(len);
        Ok(data)
    }

    /// Create or overwrite a file.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    async fn write(&self, path: &FsPath, data: Vec<u8>) -> Result<()>;

    /// Atomically replace the content of an existing file.
    ///
    /// Readers observe either the old or the new content, never a mix.
    ///
    /// # Errors
    /// - File not found
    /// - Path is a directory
    async fn replace(&self, path: &FsPath, data: Vec<u8>) -> Result<()>;

    /// Create a directory and any missing parents.
    async fn create_dir_all(&self, path: &FsPath) -> Result<()>;
}
