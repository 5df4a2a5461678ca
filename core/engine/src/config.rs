//! Run configuration.

use serde::{Deserialize, Serialize};

use crate::password::DEFAULT_PASSWORD_LENGTH;
use encryptall_common::{Error, Result};
use encryptall_keys::KeyMode;

/// Settings fixed for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Per-user keys or a single master key.
    pub mode: KeyMode,
    /// Length of generated one-time passwords.
    pub password_length: usize,
    /// Re-enumerate users before encrypting instead of reusing the users
    /// seen while provisioning keys.
    pub reread_users: bool,
    /// Pre-answers the "display passwords on screen?" question.
    pub display_passwords: Option<bool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: KeyMode::PerUser,
            password_length: DEFAULT_PASSWORD_LENGTH,
            reread_users: true,
            display_passwords: None,
        }
    }
}

impl RunConfig {
    /// Default configuration for `mode`.
    pub fn for_mode(mode: KeyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.password_length == 0 {
            return Err(Error::InvalidInput(
                "password_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
