//! Configuration file handling.
//!
//! The file is JSON; every field is optional. Command line flags are
//! applied on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use encryptall_common::UserId;
use encryptall_engine::RunConfig;
use encryptall_keys::{KeyMode, KeyStoreConfig};

/// Environment variable overriding `keys.system_secret`.
pub const SYSTEM_SECRET_ENV: &str = "ENCRYPTALL_SYSTEM_SECRET";

const DEFAULT_SENDER: &str = "root@localhost";

/// Mail spool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub spool: PathBuf,
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    DEFAULT_SENDER.to_string()
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage backend name, "local" unless set.
    pub backend: Option<String>,
    pub run: RunConfig,
    pub keys: KeyStoreConfig,
    pub mail: Option<MailConfig>,
    /// Mail addresses by user name.
    pub emails: HashMap<String, String>,
}

/// Flags that override file values.
#[derive(Debug, Default)]
pub struct Overrides {
    pub backend: Option<String>,
    pub master_key: bool,
    pub show_passwords: bool,
    pub mail_spool: Option<PathBuf>,
    pub system_secret: Option<String>,
}

impl AppConfig {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.run.validate()?;
        Ok(config)
    }

    /// Apply command line flags. The key store always follows the run mode.
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(backend) = overrides.backend {
            self.backend = Some(backend);
        }
        if overrides.master_key {
            self.run.mode = KeyMode::MasterKey;
        }
        if overrides.show_passwords {
            self.run.display_passwords = Some(true);
        }
        if let Some(spool) = overrides.mail_spool {
            let sender = self
                .mail
                .take()
                .map(|m| m.sender)
                .unwrap_or_else(default_sender);
            self.mail = Some(MailConfig { spool, sender });
        }
        if let Some(secret) = overrides.system_secret.filter(|s| !s.is_empty()) {
            self.keys.system_secret = secret;
        }
        self.keys.mode = self.run.mode;
        self
    }

    pub fn backend(&self) -> &str {
        self.backend.as_deref().unwrap_or("local")
    }

    /// Mail addresses keyed by validated user ids. Invalid names are dropped.
    pub fn email_map(&self) -> HashMap<UserId, String> {
        self.emails
            .iter()
            .filter_map(|(user, address)| {
                UserId::new(user.as_str())
                    .ok()
                    .map(|user| (user, address.clone()))
            })
            .collect()
    }
}
