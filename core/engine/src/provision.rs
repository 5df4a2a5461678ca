//! Key provisioning.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::password::PasswordGenerator;
use encryptall_common::{Error, OneTimePassword, Result, UserId};
use encryptall_keys::{KeyManager, KeyMode, UserSetup};

/// Provisioning result for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// The user already had keys; nothing was generated.
    Existing,
    /// Keys were created, protected by this one-time password.
    Generated(OneTimePassword),
    /// Provisioning failed; the user is skipped for the rest of the run.
    Failed(String),
}

/// Users considered during provisioning and what happened to each.
///
/// Lives for one run and is never persisted.
#[derive(Debug, Default)]
pub struct PasswordRegistry {
    entries: BTreeMap<UserId, Provisioned>,
}

impl PasswordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: UserId, outcome: Provisioned) {
        self.entries.insert(user, outcome);
    }

    pub fn get(&self, user: &UserId) -> Option<&Provisioned> {
        self.entries.get(user)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Users that received a new password.
    pub fn generated(&self) -> impl Iterator<Item = (&UserId, &OneTimePassword)> {
        self.entries.iter().filter_map(|(user, outcome)| match outcome {
            Provisioned::Generated(password) => Some((user, password)),
            _ => None,
        })
    }

    /// Users whose provisioning failed, with the reason.
    pub fn failed(&self) -> impl Iterator<Item = (&UserId, &str)> {
        self.entries.iter().filter_map(|(user, outcome)| match outcome {
            Provisioned::Failed(reason) => Some((user, reason.as_str())),
            _ => None,
        })
    }
}

/// Ensure both system keys exist and are valid.
///
/// Returns `true` only if the share key and the master key are both
/// present afterwards.
///
/// # Errors
/// - `Error::MasterKey` when master key validation fails
pub async fn create_master_key(keys: &dyn KeyManager) -> Result<bool> {
    keys.set_public_share_key_id_and_master_key_id().await?;
    keys.validate_share_key().await?;
    keys.validate_master_key().await?;

    let share = keys.has_public_share_key().await?;
    let master = keys.has_public_master_key().await?;
    debug!(share, master, "System key state");
    Ok(share && master)
}

/// Makes sure key material exists before any file is encrypted.
pub struct KeyProvisioner {
    mode: KeyMode,
    keys: Arc<dyn KeyManager>,
    setup: Arc<dyn UserSetup>,
    passwords: PasswordGenerator,
}

impl KeyProvisioner {
    pub fn new(
        mode: KeyMode,
        keys: Arc<dyn KeyManager>,
        setup: Arc<dyn UserSetup>,
        passwords: PasswordGenerator,
    ) -> Self {
        Self {
            mode,
            keys,
            setup,
            passwords,
        }
    }

    /// Provision keys for `users` (per-user mode) or the master key.
    ///
    /// In master-key mode `users` and `registry` are left untouched.
    ///
    /// # Errors
    /// - `Error::MasterKey` if the master key cannot be made usable; fatal
    pub async fn provision(&self, users: &[UserId], registry: &mut PasswordRegistry) -> Result<()> {
        match self.mode {
            KeyMode::MasterKey => self.provision_master_key().await,
            KeyMode::PerUser => {
                for user in users {
                    let outcome = self.provision_user(user).await;
                    registry.insert(user.clone(), outcome);
                }
                Ok(())
            }
        }
    }

    async fn provision_master_key(&self) -> Result<()> {
        match create_master_key(self.keys.as_ref()).await {
            Ok(true) => {
                info!("Master key ready");
                Ok(())
            }
            Ok(false) => Err(Error::MasterKey(
                "Master key or public share key missing after creation".to_string(),
            )),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(Error::MasterKey(format!("Master key creation failed: {}", e))),
        }
    }

    async fn provision_user(&self, user: &UserId) -> Provisioned {
        match self.keys.user_has_keys(user).await {
            Ok(true) => {
                debug!(user = %user, "User already has keys");
                return Provisioned::Existing;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(user = %user, error = %e, "Cannot check user keys");
                return Provisioned::Failed(e.to_string());
            }
        }

        let password = self.passwords.generate(user);
        match self.create_user_keys(user, &password).await {
            Ok(()) => {
                info!(user = %user, "Created keys for user");
                Provisioned::Generated(password)
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Key provisioning failed, skipping user");
                Provisioned::Failed(e.to_string())
            }
        }
    }

    async fn create_user_keys(&self, user: &UserId, password: &OneTimePassword) -> Result<()> {
        self.setup.setup_user_filesystem(user).await?;
        let created = self.setup.setup_user(user, password).await;
        if let Err(e) = self.setup.release_user_filesystem(user).await {
            warn!(user = %user, error = %e, "Failed to release user context");
        }
        created
    }
}
