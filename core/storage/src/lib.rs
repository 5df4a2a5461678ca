//! Filesystem view abstraction for encrypt-all.
//!
//! This module provides the trait-based interface the engine uses to look
//! at users' file trees (listing, kind checks, the storage backing each
//! node) and a registry for resolving backends by name.
//!
//! # Design Principles
//! - One rooted namespace: `/<user>/files/...`
//! - Every node reports the storage it lives on, so mounted foreign
//!   shares can be recognised and left alone
//! - Async operations, awaited sequentially by the engine

pub mod local;
pub mod memory;
pub mod registry;
pub mod tree;

pub use local::LocalTree;
pub use memory::MemoryTree;
pub use registry::{create_default_registry, TreeFactory, TreeRegistry};
pub use tree::{FileNode, FileTree, NodeKind, StorageHandle, StorageKind};
