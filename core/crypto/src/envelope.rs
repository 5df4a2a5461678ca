//! Envelope encryption for per-file data keys.
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305 to seal a file's data key
//! to a recipient public key with an ephemeral keypair, so files can be
//! encrypted for a user (or the master key) without that user's password.
//!
//! Also provides passphrase-protected private key storage.

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{FileKey, Salt, KEY_LENGTH};
use encryptall_common::{Error, Result};

/// Length of an XSalsa20 nonce.
const BOX_NONCE_SIZE: usize = 24;

/// Associated data binding a protected private key to its purpose.
const PRIVATE_KEY_AAD: &[u8] = b"encryptall/private-key/v1";

/// X25519 keypair owned by a user or by the system (master/share key).
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Reconstruct a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Raw public key bytes.
    pub fn public_bytes(&self) -> [u8; KEY_LENGTH] {
        *self.public.as_bytes()
    }

    /// Short identifier of the public half.
    pub fn key_id(&self) -> String {
        key_fingerprint(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair {{ public: {}, secret: [REDACTED] }}", self.key_id())
    }
}

/// Hex fingerprint (64-bit BLAKE2b) of a public key.
pub fn key_fingerprint(public: &PublicKey) -> String {
    let mut hasher = Blake2b::<U8>::new();
    hasher.update(b"encryptall/key-id");
    hasher.update(public.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A file data key sealed to one recipient public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Ephemeral X25519 public key (sender side of DH).
    pub ephemeral_public_key: [u8; 32],
    /// XSalsa20 nonce.
    pub nonce: [u8; BOX_NONCE_SIZE],
    /// Encrypted data key plus Poly1305 tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Seal a data key for a recipient.
///
/// A new ephemeral keypair is generated for every envelope.
pub fn seal_dek(dek: &FileKey, recipient: &PublicKey) -> Result<SealedEnvelope> {
    let ephemeral = SecretKey::generate(&mut rand::rngs::OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(recipient, &ephemeral);

    let mut nonce = [0u8; BOX_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce), dek.as_bytes().as_slice())
        .map_err(|e| Error::Crypto(format!("Envelope seal failed: {}", e)))?;

    Ok(SealedEnvelope {
        ephemeral_public_key: *ephemeral_pk.as_bytes(),
        nonce,
        ciphertext,
    })
}

/// Open a sealed data key with the recipient's secret key.
pub fn open_dek(envelope: &SealedEnvelope, recipient: &SecretKey) -> Result<FileKey> {
    let ephemeral_pk = PublicKey::from(envelope.ephemeral_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, recipient);

    let plaintext = salsa_box
        .decrypt(
            crypto_box::Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_slice(),
        )
        .map_err(|_| Error::Crypto("Envelope open failed (wrong key or tampered data)".into()))?;

    let bytes: [u8; KEY_LENGTH] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto(format!("Data key has {} bytes", plaintext.len())))?;
    Ok(FileKey::from_bytes(bytes))
}

/// Private key encrypted under a passphrase (Argon2id -> XChaCha20-Poly1305).
///
/// Bundles salt and KDF parameters so the passphrase is the only input
/// needed to unlock it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PassphraseProtectedKey {
    pub salt: Salt,
    pub kdf: KdfParams,
    #[serde(with = "b64")]
    pub encrypted: Vec<u8>,
}

/// Encrypt a private key with a passphrase.
pub fn protect_private_key(
    keypair: &KeyPair,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<PassphraseProtectedKey> {
    let salt = Salt::generate();
    let wrapping = derive_key(passphrase, &salt, params)?;
    let encrypted = aead::encrypt(
        wrapping.as_bytes(),
        &keypair.secret.to_bytes(),
        PRIVATE_KEY_AAD,
    )?;

    Ok(PassphraseProtectedKey {
        salt,
        kdf: params.clone(),
        encrypted,
    })
}

/// Decrypt a passphrase-protected private key back into its keypair.
///
/// # Errors
/// - `Error::Crypto` if the passphrase is wrong or the blob was tampered with
pub fn unlock_private_key(protected: &PassphraseProtectedKey, passphrase: &[u8]) -> Result<KeyPair> {
    let wrapping = derive_key(passphrase, &protected.salt, &protected.kdf)?;
    let plaintext = aead::decrypt(wrapping.as_bytes(), &protected.encrypted, PRIVATE_KEY_AAD)?;

    let bytes: [u8; KEY_LENGTH] = plaintext.as_slice().try_into().map_err(|_| {
        Error::Crypto(format!(
            "Invalid private key length: expected {}, got {}",
            KEY_LENGTH,
            plaintext.len()
        ))
    })?;
    Ok(KeyPair::from_secret_bytes(bytes))
}

/// Decode a stored public key.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    let raw: [u8; KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| Error::Key(format!("Public key has {} bytes", bytes.len())))?;
    Ok(PublicKey::from(raw))
}

/// Serde helper storing byte vectors as standard base64 strings.
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
