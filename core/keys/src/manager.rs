//! Collaborator roles driven by the encryption engine.

use async_trait::async_trait;

use encryptall_common::{FsPath, OneTimePassword, Result, UserId};

/// Queries and maintenance of key material.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Whether `user` already owns a usable keypair.
    async fn user_has_keys(&self, user: &UserId) -> Result<bool>;

    /// Encryption version of a file; 0 means plain.
    async fn version(&self, path: &FsPath) -> Result<u32>;

    /// Whether the public master key exists.
    async fn has_public_master_key(&self) -> Result<bool>;

    /// Whether the public share key exists.
    async fn has_public_share_key(&self) -> Result<bool>;

    /// Create the master keypair if missing and prove it usable.
    ///
    /// # Errors
    /// - `Error::MasterKey` when the master key cannot be used; fatal for a run
    async fn validate_master_key(&self) -> Result<()>;

    /// Create the share keypair if missing.
    async fn validate_share_key(&self) -> Result<()>;

    /// Load or allocate the identifiers of the share and master keys.
    async fn set_public_share_key_id_and_master_key_id(&self) -> Result<()>;
}

/// Per-user provisioning.
#[async_trait]
pub trait UserSetup: Send + Sync {
    /// Create key material for `user`, protected by `password`.
    async fn setup_user(&self, user: &UserId, password: &OneTimePassword) -> Result<()>;

    /// Establish `user`'s working context before touching their files.
    async fn setup_user_filesystem(&self, user: &UserId) -> Result<()>;

    /// Leave the working context entered by [`UserSetup::setup_user_filesystem`].
    async fn release_user_filesystem(&self, user: &UserId) -> Result<()>;
}

/// In-place encryption of a single file.
#[async_trait]
pub trait FileEncryptor: Send + Sync {
    /// Encrypt the file at `path` in place, under the active user context.
    async fn encrypt_file(&self, path: &FsPath) -> Result<()>;
}
