//! Persisted key records.
//!
//! All records are JSON documents stored through the file tree.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use encryptall_common::{Error, Result};
use encryptall_crypto::{public_key_from_bytes, KeyPair, PassphraseProtectedKey, PublicKey};

/// Public half of a keypair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPublicKey {
    pub key_id: String,
    /// Standard base64 of the raw X25519 public key.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl StoredPublicKey {
    pub fn from_keypair(keypair: &KeyPair) -> Self {
        Self {
            key_id: keypair.key_id(),
            public_key: STANDARD.encode(keypair.public_bytes()),
            created_at: Utc::now(),
        }
    }

    /// Decode the stored key.
    pub fn public_key(&self) -> Result<PublicKey> {
        let bytes = STANDARD
            .decode(&self.public_key)
            .map_err(|e| Error::Key(format!("Invalid public key encoding: {}", e)))?;
        public_key_from_bytes(&bytes)
    }
}

/// Private half of a keypair, protected by a passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrivateKey {
    pub key_id: String,
    pub protected: PassphraseProtectedKey,
    pub created_at: DateTime<Utc>,
}

/// Identifiers of the system-wide keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemKeyIds {
    pub master_key_id: String,
    pub public_share_key_id: String,
}

impl SystemKeyIds {
    /// Allocate fresh identifiers.
    pub fn generate() -> Self {
        Self {
            master_key_id: format!("master_{}", random_suffix()),
            public_share_key_id: format!("pubShare_{}", random_suffix()),
        }
    }
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn to_json<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(record)?)
}

pub(crate) fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
