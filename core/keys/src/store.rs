//! Key store kept inside the file tree.
//!
//! Layout:
//! ```text
//! /<user>/files_encryption/public.key      StoredPublicKey
//! /<user>/files_encryption/private.key     StoredPrivateKey (one-time password)
//! /files_encryption/system.json            SystemKeyIds
//! /files_encryption/<id>.public.key        master / share public keys
//! /files_encryption/<id>.private.key       master / share private keys (system secret)
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{KeyMode, KeyStoreConfig};
use crate::manager::{FileEncryptor, KeyManager, UserSetup};
use crate::records::{from_json, to_json, StoredPrivateKey, StoredPublicKey, SystemKeyIds};
use encryptall_common::{Error, FsPath, OneTimePassword, Result, UserId};
use encryptall_crypto::{
    open_dek, protect_private_key, seal_dek, sealed_header_end, sealed_version,
    unlock_private_key, FileKey, KeyPair, PublicKey, SealedFile, HEADER_PREFIX_LEN,
};
use encryptall_storage::FileTree;

const KEYS_DIRNAME: &str = "files_encryption";
const PUBLIC_KEY_FILE: &str = "public.key";
const PRIVATE_KEY_FILE: &str = "private.key";
const SYSTEM_IDS_FILE: &str = "system.json";

/// Key store implementing every key-related collaborator role.
pub struct TreeKeyStore {
    tree: Arc<dyn FileTree>,
    config: KeyStoreConfig,
    active_user: Mutex<Option<UserId>>,
    system_ids: Mutex<Option<SystemKeyIds>>,
}

impl TreeKeyStore {
    /// Create a key store over `tree`.
    pub fn new(tree: Arc<dyn FileTree>, config: KeyStoreConfig) -> Self {
        Self {
            tree,
            config,
            active_user: Mutex::new(None),
            system_ids: Mutex::new(None),
        }
    }

    /// Key mode of this store.
    pub fn mode(&self) -> KeyMode {
        self.config.mode
    }

    /// User whose working context is currently active.
    pub async fn active_user(&self) -> Option<UserId> {
        self.active_user.lock().await.clone()
    }

    /// Identifiers of the system keys, once loaded or allocated.
    pub async fn system_key_ids(&self) -> Option<SystemKeyIds> {
        self.system_ids.lock().await.clone()
    }

    fn user_keys_dir(user: &UserId) -> Result<FsPath> {
        FsPath::root().join(user.as_str())?.join(KEYS_DIRNAME)
    }

    fn system_keys_dir() -> Result<FsPath> {
        FsPath::root().join(KEYS_DIRNAME)
    }

    fn system_key_file(key_id: &str, suffix: &str) -> Result<FsPath> {
        Self::system_keys_dir()?.join(&format!("{}.{}", key_id, suffix))
    }

    async fn read_record<T: for<'de> Deserialize<'de>>(&self, path: &FsPath) -> Result<Option<T>> {
        if !self.tree.exists(path).await? {
            return Ok(None);
        }
        let bytes = self.tree.read(path).await?;
        Ok(Some(from_json(&bytes)?))
    }

    async fn write_record<T: Serialize>(&self, path: &FsPath, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.tree.create_dir_all(&parent).await?;
        }
        self.tree.write(path, to_json(record)?).await
    }

    async fn write_keypair(
        &self,
        public_path: &FsPath,
        private_path: &FsPath,
        keypair: &KeyPair,
        passphrase: &[u8],
    ) -> Result<()> {
        let public = StoredPublicKey::from_keypair(keypair);
        let private = StoredPrivateKey {
            key_id: public.key_id.clone(),
            protected: protect_private_key(keypair, passphrase, &self.config.kdf)?,
            created_at: public.created_at,
        };
        // Private first: a public key on disk means the pair is complete.
        self.write_record(private_path, &private).await?;
        self.write_record(public_path, &public).await
    }

    async fn loaded_ids(&self) -> Option<SystemKeyIds> {
        self.system_ids.lock().await.clone()
    }

    async fn require_ids(&self) -> Result<SystemKeyIds> {
        self.loaded_ids().await.ok_or_else(|| {
            Error::Key("System key ids are not set; load them before using system keys".into())
        })
    }

    async fn system_key_exists(&self, key_id: &str) -> Result<bool> {
        self.tree
            .exists(&Self::system_key_file(key_id, PUBLIC_KEY_FILE)?)
            .await
    }

    /// Create the system keypair `key_id` unless it exists. Returns whether it was created.
    async fn ensure_system_keypair(&self, key_id: &str) -> Result<bool> {
        if self.system_key_exists(key_id).await? {
            return Ok(false);
        }

        let keypair = KeyPair::generate();
        self.write_keypair(
            &Self::system_key_file(key_id, PUBLIC_KEY_FILE)?,
            &Self::system_key_file(key_id, PRIVATE_KEY_FILE)?,
            &keypair,
            self.config.system_secret.as_bytes(),
        )
        .await?;
        info!(key_id, "Created system keypair");
        Ok(true)
    }

    async fn system_public_key(&self, key_id: &str) -> Result<PublicKey> {
        let path = Self::system_key_file(key_id, PUBLIC_KEY_FILE)?;
        let record: StoredPublicKey = self
            .read_record(&path)
            .await?
            .ok_or_else(|| Error::Key(format!("Missing system public key {}", key_id)))?;
        record.public_key()
    }

    async fn user_public_key(&self, user: &UserId) -> Result<PublicKey> {
        let path = Self::user_keys_dir(user)?.join(PUBLIC_KEY_FILE)?;
        let record: StoredPublicKey = self
            .read_record(&path)
            .await?
            .ok_or_else(|| Error::Key(format!("User {} has no public key", user)))?;
        record.public_key()
    }

    /// Unlock the stored master keypair and run a seal/open round through it.
    async fn probe_master_key(&self, key_id: &str) -> Result<()> {
        let public = self.system_public_key(key_id).await?;
        let private: StoredPrivateKey = self
            .read_record(&Self::system_key_file(key_id, PRIVATE_KEY_FILE)?)
            .await?
            .ok_or_else(|| Error::Key(format!("Missing system private key {}", key_id)))?;

        let keypair = unlock_private_key(&private.protected, self.config.system_secret.as_bytes())?;
        if keypair.public != public {
            return Err(Error::Key(
                "Master private key does not match its public key".to_string(),
            ));
        }

        let probe = FileKey::generate();
        let envelope = seal_dek(&probe, &public)?;
        let opened = open_dek(&envelope, &keypair.secret)?;
        if opened.as_bytes() != probe.as_bytes() {
            return Err(Error::Key("Master key probe mismatch".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyManager for TreeKeyStore {
    async fn user_has_keys(&self, user: &UserId) -> Result<bool> {
        let dir = Self::user_keys_dir(user)?;
        Ok(self.tree.exists(&dir.join(PUBLIC_KEY_FILE)?).await?
            && self.tree.exists(&dir.join(PRIVATE_KEY_FILE)?).await?)
    }

    async fn version(&self, path: &FsPath) -> Result<u32> {
        let prefix = self.tree.read_head(path, HEADER_PREFIX_LEN).await?;
        let Some(header_end) = sealed_header_end(&prefix) else {
            return Ok(0);
        };
        let head = self.tree.read_head(path, header_end).await?;
        Ok(sealed_version(&head))
    }

    async fn has_public_master_key(&self) -> Result<bool> {
        match self.loaded_ids().await {
            Some(ids) => self.system_key_exists(&ids.master_key_id).await,
            None => Ok(false),
        }
    }

    async fn has_public_share_key(&self) -> Result<bool> {
        match self.loaded_ids().await {
            Some(ids) => self.system_key_exists(&ids.public_share_key_id).await,
            None => Ok(false),
        }
    }

    async fn validate_master_key(&self) -> Result<()> {
        if !self.config.mode.is_master_key() {
            debug!("Master key validation skipped outside master-key mode");
            return Ok(());
        }

        let ids = self
            .require_ids()
            .await
            .map_err(|e| Error::MasterKey(e.to_string()))?;
        self.ensure_system_keypair(&ids.master_key_id)
            .await
            .map_err(|e| Error::MasterKey(format!("Cannot create master key: {}", e)))?;
        self.probe_master_key(&ids.master_key_id)
            .await
            .map_err(|e| Error::MasterKey(format!("Master key is unusable: {}", e)))?;

        debug!(key_id = %ids.master_key_id, "Master key validated");
        Ok(())
    }

    async fn validate_share_key(&self) -> Result<()> {
        let ids = self.require_ids().await?;
        self.ensure_system_keypair(&ids.public_share_key_id).await?;
        Ok(())
    }

    async fn set_public_share_key_id_and_master_key_id(&self) -> Result<()> {
        let mut cached = self.system_ids.lock().await;
        if cached.is_some() {
            return Ok(());
        }

        let path = Self::system_keys_dir()?.join(SYSTEM_IDS_FILE)?;
        let ids = match self.read_record::<SystemKeyIds>(&path).await? {
            Some(ids) => ids,
            None => {
                let ids = SystemKeyIds::generate();
                self.write_record(&path, &ids).await?;
                info!(
                    master = %ids.master_key_id,
                    share = %ids.public_share_key_id,
                    "Allocated system key ids"
                );
                ids
            }
        };
        *cached = Some(ids);
        Ok(())
    }
}

#[async_trait]
impl UserSetup for TreeKeyStore {
    async fn setup_user(&self, user: &UserId, password: &OneTimePassword) -> Result<()> {
        if self.user_has_keys(user).await? {
            debug!(user = %user, "User already has keys");
            return Ok(());
        }

        let dir = Self::user_keys_dir(user)?;
        let keypair = KeyPair::generate();
        self.write_keypair(
            &dir.join(PUBLIC_KEY_FILE)?,
            &dir.join(PRIVATE_KEY_FILE)?,
            &keypair,
            password.expose().as_bytes(),
        )
        .await
        .map_err(|e| Error::UserSetup(format!("Cannot create keys for {}: {}", user, e)))?;

        info!(user = %user, key_id = %keypair.key_id(), "Created user keypair");
        Ok(())
    }

    async fn setup_user_filesystem(&self, user: &UserId) -> Result<()> {
        for dir in [FsPath::user_files_root(user), Self::user_keys_dir(user)?] {
            self.tree.create_dir_all(&dir).await.map_err(|e| {
                Error::UserSetup(format!("Cannot prepare {} for {}: {}", dir, user, e))
            })?;
        }

        let mut active = self.active_user.lock().await;
        if let Some(previous) = active.as_ref().filter(|previous| *previous != user) {
            debug!(previous = %previous, user = %user, "Switching user context");
        }
        *active = Some(user.clone());
        Ok(())
    }

    async fn release_user_filesystem(&self, user: &UserId) -> Result<()> {
        let mut active = self.active_user.lock().await;
        if active.as_ref() == Some(user) {
            *active = None;
        }
        Ok(())
    }
}

#[async_trait]
impl FileEncryptor for TreeKeyStore {
    async fn encrypt_file(&self, path: &FsPath) -> Result<()> {
        let owner = path
            .owner()
            .ok_or_else(|| Error::InvalidInput(format!("Path has no owner: {}", path)))?;

        let active = self.active_user().await;
        if active.as_ref() != Some(&owner) {
            return Err(Error::NotPermitted(format!(
                "Encrypting {} requires the context of {}",
                path, owner
            )));
        }

        let data = self.tree.read(path).await?;
        if sealed_version(&data) > 0 {
            debug!(path = %path, "File became encrypted meanwhile");
            return Ok(());
        }

        let recipient = match self.config.mode {
            KeyMode::MasterKey => {
                let ids = self.require_ids().await?;
                self.system_public_key(&ids.master_key_id).await?
            }
            KeyMode::PerUser => self.user_public_key(&owner).await?,
        };

        let sealed = SealedFile::seal(&data, &[&recipient])?;
        self.tree.replace(path, sealed.to_bytes()?).await?;

        debug!(path = %path, bytes = data.len(), "Encrypted file");
        Ok(())
    }
}
