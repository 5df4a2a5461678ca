//! Per-file encryption decision.

use std::sync::Arc;
use tracing::{debug, warn};

use encryptall_common::{Error, FsPath, Result};
use encryptall_keys::{FileEncryptor, KeyManager, UserSetup};

/// Encrypts a file unless it already carries an encryption version.
pub struct FileEncryptionGate {
    keys: Arc<dyn KeyManager>,
    setup: Arc<dyn UserSetup>,
    encryptor: Arc<dyn FileEncryptor>,
}

impl FileEncryptionGate {
    pub fn new(
        keys: Arc<dyn KeyManager>,
        setup: Arc<dyn UserSetup>,
        encryptor: Arc<dyn FileEncryptor>,
    ) -> Self {
        Self {
            keys,
            setup,
            encryptor,
        }
    }

    /// Encrypt `path` in place if it is still plain.
    ///
    /// Returns `true` if the file was encrypted by this call and `false`
    /// if it was already encrypted. The owner's working context is entered
    /// for the encryption and always left again.
    pub async fn encrypt_if_needed(&self, path: &FsPath) -> Result<bool> {
        let version = self.keys.version(path).await?;
        if version > 0 {
            debug!(path = %path, version, "Already encrypted");
            return Ok(false);
        }

        let owner = path
            .owner()
            .ok_or_else(|| Error::InvalidInput(format!("Path has no owner: {}", path)))?;

        self.setup.setup_user_filesystem(&owner).await?;
        let result = self.encryptor.encrypt_file(path).await;
        if let Err(e) = self.setup.release_user_filesystem(&owner).await {
            warn!(user = %owner, error = %e, "Failed to release user context");
        }

        result.map(|()| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeKeys;

    fn p(path: &str) -> FsPath {
        FsPath::parse(path).unwrap()
    }

    fn gate(keys: &Arc<FakeKeys>) -> FileEncryptionGate {
        FileEncryptionGate::new(keys.clone(), keys.clone(), keys.clone())
    }

    #[tokio::test]
    async fn test_encrypted_file_is_skipped() {
        let keys = Arc::new(FakeKeys::new());
        keys.set_version(&p("/user1/files/bar"), 1);

        assert!(!gate(&keys).encrypt_if_needed(&p("/user1/files/bar")).await.unwrap());

        let calls = keys.calls();
        assert!(calls.encrypt.is_empty());
        assert!(calls.setup_fs.is_empty());
    }

    #[tokio::test]
    async fn test_plain_file_is_encrypted_once() {
        let keys = Arc::new(FakeKeys::new());

        assert!(gate(&keys).encrypt_if_needed(&p("/user1/files/bar")).await.unwrap());

        let calls = keys.calls();
        assert_eq!(calls.encrypt, vec![p("/user1/files/bar")]);
        assert_eq!(calls.setup_fs.len(), 1);
        assert_eq!(calls.release_fs.len(), 1);
    }

    #[tokio::test]
    async fn test_context_released_when_encryption_fails() {
        let keys = Arc::new(FakeKeys::new());
        keys.fail_encrypt_for(&p("/user1/files/bar"));

        assert!(gate(&keys).encrypt_if_needed(&p("/user1/files/bar")).await.is_err());
        assert_eq!(keys.calls().release_fs.len(), 1);
    }
}
