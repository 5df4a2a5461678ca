//! Key store configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use encryptall_crypto::KdfParams;

/// Which keys files are encrypted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Every user owns a keypair; files are sealed to their owner.
    #[default]
    PerUser,
    /// One system-wide master keypair; files are sealed to the master key.
    MasterKey,
}

impl KeyMode {
    /// Check if this is master-key mode.
    pub fn is_master_key(&self) -> bool {
        matches!(self, Self::MasterKey)
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerUser => write!(f, "per-user"),
            Self::MasterKey => write!(f, "master-key"),
        }
    }
}

/// Configuration of a [`TreeKeyStore`](crate::TreeKeyStore).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Key mode, fixed for the lifetime of the store.
    #[serde(default)]
    pub mode: KeyMode,
    /// Secret protecting the master and share private keys.
    #[serde(default)]
    pub system_secret: String,
    /// KDF parameters for newly protected private keys.
    #[serde(default)]
    pub kdf: KdfParams,
}

impl KeyStoreConfig {
    /// Create a configuration with default KDF parameters.
    pub fn new(mode: KeyMode, system_secret: impl Into<String>) -> Self {
        Self {
            mode,
            system_secret: system_secret.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Override the KDF parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

impl fmt::Debug for KeyStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreConfig")
            .field("mode", &self.mode)
            .field("system_secret", &"[REDACTED]")
            .field("kdf", &self.kdf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&KeyMode::MasterKey).unwrap(),
            "\"master_key\""
        );
        let mode: KeyMode = serde_json::from_str("\"per_user\"").unwrap();
        assert_eq!(mode, KeyMode::PerUser);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: KeyStoreConfig = serde_json::from_str(r#"{"mode":"master_key"}"#).unwrap();
        assert!(config.mode.is_master_key());
        assert!(config.system_secret.is_empty());
        assert_eq!(config.kdf, KdfParams::moderate());
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = KeyStoreConfig::new(KeyMode::MasterKey, "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
