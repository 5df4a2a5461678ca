//! Depth-first discovery of a user's plain files.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use encryptall_common::{FsPath, Result};
use encryptall_storage::FileTree;

/// Walks one user's file tree, yielding every file not inside a foreign share.
///
/// Uses an explicit stack of pending directories, so tree depth does not
/// grow the call stack. A directory backed by an incoming share is
/// dropped as a whole at the point it is discovered.
pub struct TreeWalker {
    tree: Arc<dyn FileTree>,
    root: FsPath,
    started: bool,
    pending_dirs: Vec<FsPath>,
    ready: VecDeque<FsPath>,
    discovered: u64,
    skipped_shares: u64,
}

impl TreeWalker {
    /// Walker over everything below `root`, usually `/<user>/files`.
    pub fn new(tree: Arc<dyn FileTree>, root: FsPath) -> Self {
        Self {
            tree,
            root,
            started: false,
            pending_dirs: Vec::new(),
            ready: VecDeque::new(),
            discovered: 0,
            skipped_shares: 0,
        }
    }

    /// Files discovered so far, including ones not yet returned.
    pub fn discovered(&self) -> u64 {
        self.discovered
    }

    /// Foreign-share entries skipped so far.
    pub fn skipped_shares(&self) -> u64 {
        self.skipped_shares
    }

    /// Next file to consider, or `None` when the walk is complete.
    ///
    /// # Errors
    /// - The root cannot be inspected or listed
    pub async fn next_file(&mut self) -> Result<Option<FsPath>> {
        if !self.started {
            self.started = true;
            self.enter_root().await?;
        }

        loop {
            if let Some(file) = self.ready.pop_front() {
                return Ok(Some(file));
            }

            let Some(dir) = self.pending_dirs.pop() else {
                return Ok(None);
            };

            let is_root = dir == self.root;
            match self.tree.list_directory(&dir).await {
                Ok(children) => self.absorb(children),
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!(path = %dir, error = %e, "Cannot list directory, skipping it");
                }
            }
        }
    }

    /// Drain the walk into a list.
    pub async fn collect_all(mut self) -> Result<Vec<FsPath>> {
        let mut files = Vec::new();
        while let Some(file) = self.next_file().await? {
            files.push(file);
        }
        Ok(files)
    }

    async fn enter_root(&mut self) -> Result<()> {
        if !self.tree.is_directory(&self.root).await? {
            debug!(root = %self.root, "No file root, nothing to walk");
            return Ok(());
        }

        let storage = self.tree.storage(&self.root).await?;
        if storage.is_foreign_share() {
            debug!(root = %self.root, storage = %storage, "File root is a foreign share");
            self.skipped_shares += 1;
            return Ok(());
        }

        self.pending_dirs.push(self.root.clone());
        Ok(())
    }

    fn absorb(&mut self, children: Vec<encryptall_storage::FileNode>) {
        let mut subdirs = Vec::new();

        for node in children {
            if node.storage.is_foreign_share() {
                debug!(path = %node.path, storage = %node.storage, "Skipping incoming share");
                self.skipped_shares += 1;
                continue;
            }

            if node.is_directory() {
                subdirs.push(node.path);
            } else {
                self.discovered += 1;
                self.ready.push_back(node.path);
            }
        }

        // Reversed so the first listed directory is walked first.
        self.pending_dirs.extend(subdirs.into_iter().rev());
    }
}
