//! In-memory file tree for testing and dry runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tree::{FileNode, FileTree, NodeKind, StorageHandle, StorageKind};
use encryptall_common::{Error, FsPath, Result, UserId};

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8> },
    Directory,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<FsPath, Entry>,
    mounts: BTreeMap<FsPath, StorageHandle>,
}

/// In-memory file tree.
///
/// Entries are kept in path order, so listings are deterministic. Storages
/// other than the owner's home are attached with [`MemoryTree::mount`].
pub struct MemoryTree {
    state: RwLock<State>,
}

impl MemoryTree {
    /// Create a tree containing only the root directory.
    pub fn new() -> Self {
        let mut state = State::default();
        state.entries.insert(FsPath::root(), Entry::Directory);
        Self {
            state: RwLock::new(state),
        }
    }

    /// Attach a storage at `mount_point`, creating the directory if needed.
    ///
    /// Everything below the mount point reports `handle` as its storage.
    pub fn mount(&self, mount_point: &FsPath, handle: StorageHandle) -> Result<()> {
        let mut state = self.write_state()?;
        Self::create_dirs(&mut state, mount_point)?;
        state.mounts.insert(mount_point.clone(), handle);
        Ok(())
    }

    /// Mount another user's share at `mount_point`.
    pub fn mount_share(&self, mount_point: &FsPath, owner: Option<UserId>) -> Result<()> {
        self.mount(
            mount_point,
            StorageHandle::incoming_share(mount_point, owner),
        )
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::Storage("Memory tree lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::Storage("Memory tree lock poisoned".to_string()))
    }

    fn create_dirs(state: &mut State, path: &FsPath) -> Result<()> {
        let mut current = FsPath::root();
        for component in path.components() {
            current = current.join(component)?;
            match state.entries.get(&current) {
                Some(Entry::Directory) => {}
                Some(Entry::File { .. }) => {
                    return Err(Error::InvalidInput(format!(
                        "Cannot create directory over file: {}",
                        current
                    )));
                }
                None => {
                    state.entries.insert(current.clone(), Entry::Directory);
                }
            }
        }
        Ok(())
    }

    fn storage_of(state: &State, path: &FsPath) -> StorageHandle {
        let mut probe = Some(path.clone());
        while let Some(candidate) = probe {
            if let Some(handle) = state.mounts.get(&candidate) {
                return handle.clone();
            }
            probe = candidate.parent();
        }

        match path.owner() {
            Some(owner) => StorageHandle::home(&owner),
            None => StorageHandle {
                id: "root".to_string(),
                kind: StorageKind::Home,
            },
        }
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileTree for MemoryTree {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_directory(&self, path: &FsPath) -> Result<Vec<FileNode>> {
        let state = self.read_state()?;

        match state.entries.get(path) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
            }
            None => return Err(Error::NotFound(format!("Directory not found: {}", path))),
        }

        let depth = path.components().len() + 1;
        let nodes = state
            .entries
            .range(path.clone()..)
            .skip(1)
            .take_while(|(key, _)| key.starts_with(path))
            .filter(|(key, _)| key.components().len() == depth)
            .map(|(key, entry)| {
                let (kind, size) = match entry {
                    Entry::File { data } => (NodeKind::File, Some(data.len() as u64)),
                    Entry::Directory => (NodeKind::Directory, None),
                };
                FileNode {
                    path: key.clone(),
                    name: key.name().unwrap_or_default().to_string(),
                    kind,
                    size,
                    storage: Self::storage_of(&state, key),
                }
            })
            .collect();

        Ok(nodes)
    }

    async fn is_directory(&self, path: &FsPath) -> Result<bool> {
        let state = self.read_state()?;
        Ok(matches!(state.entries.get(path), Some(Entry::Directory)))
    }

    async fn storage(&self, path: &FsPath) -> Result<StorageHandle> {
        let state = self.read_state()?;
        if !state.entries.contains_key(path) {
            return Err(Error::NotFound(format!("Path not found: {}", path)));
        }
        Ok(Self::storage_of(&state, path))
    }

    async fn exists(&self, path: &FsPath) -> Result<bool> {
        Ok(self.read_state()?.entries.contains_key(path))
    }

    async fn read(&self, path: &FsPath) -> Result<Vec<u8>> {
        let state = self.read_state()?;
        match state.entries.get(path) {
            Some(Entry::File { data }) => Ok(data.clone()),
            Some(Entry::Directory) => {
                Err(Error::InvalidInput(format!("Cannot read directory: {}", path)))
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn read_head(&self, path: &FsPath, len: usize) -> Result<Vec<u8>> {
        let state = self.read_state()?;
        match state.entries.get(path) {
            Some(Entry::File { data }) => Ok(data[..data.len().min(len)].to_vec()),
            Some(Entry::Directory) => {
                Err(Error::InvalidInput(format!("Cannot read directory: {}", path)))
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn write(&self, path: &FsPath, data: Vec<u8>) -> Result<()> {
        let mut state = self.write_state()?;

        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput("Cannot write to root".to_string()))?;
        match state.entries.get(&parent) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidInput(format!("Parent is a file: {}", parent)));
            }
            None => {
                return Err(Error::NotFound(format!(
                    "Parent directory not found: {}",
                    parent
                )));
            }
        }
        if let Some(Entry::Directory) = state.entries.get(path) {
            return Err(Error::InvalidInput(format!(
                "Cannot overwrite directory: {}",
                path
            )));
        }

        state.entries.insert(path.clone(), Entry::File { data });
        Ok(())
    }

    async fn replace(&self, path: &FsPath, data: Vec<u8>) -> Result<()> {
        let mut state = self.write_state()?;
        match state.entries.get_mut(path) {
            Some(Entry::File { data: current }) => {
                *current = data;
                Ok(())
            }
            Some(Entry::Directory) => Err(Error::InvalidInput(format!(
                "Cannot replace directory: {}",
                path
            ))),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn create_dir_all(&self, path: &FsPath) -> Result<()> {
        let mut state = self.write_state()?;
        Self::create_dirs(&mut state, path)
    }
}
