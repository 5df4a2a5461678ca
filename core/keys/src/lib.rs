//! Key management for encrypt-all.
//!
//! Defines the collaborator roles the engine drives (key queries, user
//! setup, in-place file encryption) and a key store implementing all of
//! them on top of a [`FileTree`](encryptall_storage::FileTree).

pub mod config;
pub mod manager;
pub mod records;
pub mod store;

pub use config::{KeyMode, KeyStoreConfig};
pub use manager::{FileEncryptor, KeyManager, UserSetup};
pub use records::{StoredPrivateKey, StoredPublicKey, SystemKeyIds};
pub use store::TreeKeyStore;
