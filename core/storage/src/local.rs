//! Local filesystem tree.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tree::{FileNode, FileTree, NodeKind, StorageHandle, StorageKind};
use encryptall_common::{Error, FsPath, Result};

/// File tree backed by a local data directory.
///
/// `/<user>/files/...` maps to `<root>/<user>/files/...`. A symbolic link
/// inside the tree marks a mounted share: the link and everything below it
/// report an incoming-share storage.
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    /// Create a tree rooted at the given data directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Data directory this tree is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, path: &FsPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    async fn is_symlink(&self, path: &FsPath) -> Result<bool> {
        match fs::symlink_metadata(self.to_fs_path(path)).await {
            Ok(meta) => Ok(meta.file_type().is_symlink()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Storage of `path`, found by looking for the outermost symlinked ancestor.
    async fn resolve_storage(&self, path: &FsPath) -> Result<StorageHandle> {
        let mut current = FsPath::root();
        for component in path.components() {
            current = current.join(component)?;
            if self.is_symlink(&current).await? {
                return Ok(StorageHandle::incoming_share(&current, None));
            }
        }

        Ok(match path.owner() {
            Some(owner) => StorageHandle::home(&owner),
            None => StorageHandle {
                id: "root".to_string(),
                kind: StorageKind::Home,
            },
        })
    }

    fn temp_name(name: &str) -> String {
        format!("{}.encrypted.{}.part", name, Uuid::new_v4())
    }

    /// Whether `name` has the exact shape written by [`Self::temp_name`].
    fn is_temp_file(name: &str) -> bool {
        name.strip_suffix(".part")
            .and_then(|rest| rest.rsplit_once(".encrypted."))
            .is_some_and(|(original, id)| !original.is_empty() && Uuid::parse_str(id).is_ok())
    }
}

#[async_trait]
impl FileTree for LocalTree {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_directory(&self, path: &FsPath) -> Result<Vec<FileNode>> {
        let fs_path = self.to_fs_path(path);

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("Directory not found: {}", path)));
        }

        if !fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
        }

        let parent_storage = self.resolve_storage(path).await?;
        let mut results = Vec::new();
        let mut entries = fs::read_dir(&fs_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(dir = %path, "Skipping non UTF-8 entry");
                continue;
            };
            if Self::is_temp_file(&name) {
                continue;
            }

            // One unusable entry must not hide its siblings.
            let child = match path.join(&name) {
                Ok(child) => child,
                Err(e) => {
                    warn!(dir = %path, name = %name, error = %e, "Skipping unsupported entry name");
                    continue;
                }
            };
            let linked = match entry.file_type().await {
                Ok(file_type) => file_type.is_symlink(),
                Err(e) => {
                    warn!(path = %child, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            // Follows links; a dangling link has no target to describe.
            let fs_meta = match fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) if linked && e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %child, "Skipping dangling link");
                    continue;
                }
                Err(e) => {
                    warn!(path = %child, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let storage = if linked && !parent_storage.is_foreign_share() {
                StorageHandle::incoming_share(&child, None)
            } else {
                parent_storage.clone()
            };

            results.push(FileNode {
                path: child,
                name,
                kind: if fs_meta.is_dir() {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                },
                size: fs_meta.is_file().then(|| fs_meta.len()),
                storage,
            });
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    async fn is_directory(&self, path: &FsPath) -> Result<bool> {
        match fs::metadata(self.to_fs_path(path)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn storage(&self, path: &FsPath) -> Result<StorageHandle> {
        if !self.to_fs_path(path).exists() {
            return Err(Error::NotFound(format!("Path not found: {}", path)));
        }
        self.resolve_storage(path).await
    }

    async fn exists(&self, path: &FsPath) -> Result<bool> {
        Ok(self.to_fs_path(path).exists())
    }

    async fn read(&self, path: &FsPath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("File not found: {}", path)));
        }

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot read directory: {}", path)));
        }

        Ok(fs::read(&fs_path).await?)
    }

    async fn read_head(&self, path: &FsPath, len: usize) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);

        if !fs_path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", path)));
        }

        let file = fs::File::open(&fs_path).await?;
        let mut head = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut head).await?;
        Ok(head)
    }

    async fn write(&self, path: &FsPath, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        match fs_path.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => {
                return Err(Error::NotFound(format!(
                    "Parent directory not found: {}",
                    path
                )))
            }
        }

        fs::write(&fs_path, &data).await?;
        Ok(())
    }

    async fn replace(&self, path: &FsPath, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("File not found: {}", path)));
        }
        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Cannot replace directory: {}",
                path
            )));
        }

        let name = path
            .name()
            .ok_or_else(|| Error::InvalidInput("Cannot replace root".to_string()))?;
        let temp_path = fs_path.with_file_name(Self::temp_name(name));

        if let Err(e) = fs::write(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &fs_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "Failed to move encrypted content over {}: {}",
                path, e
            )));
        }
        Ok(())
    }

    async fn create_dir_all(&self, path: &FsPath) -> Result<()> {
        fs::create_dir_all(self.to_fs_path(path)).await?;
        Ok(())
    }
}
