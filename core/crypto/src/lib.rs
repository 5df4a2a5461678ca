//! Cryptographic primitives for encrypt-all.
//!
//! This module provides the reference implementation behind the key
//! management and file encryption collaborators:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - X25519 keypairs and sealed envelopes for per-file keys
//! - The sealed file format and its version marker
//!
//! # Security Guarantees
//! - All symmetric key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod envelope;
pub mod format;
pub mod kdf;
pub mod keys;

pub use crypto_box::{PublicKey, SecretKey};

pub use aead::{decrypt, encrypt};
pub use envelope::{
    key_fingerprint, open_dek, protect_private_key, public_key_from_bytes, seal_dek,
    unlock_private_key, KeyPair, PassphraseProtectedKey, SealedEnvelope,
};
pub use format::{
    peek_version, sealed_header_end, sealed_version, Recipient, SealedFile, FORMAT_VERSION,
    HEADER_PREFIX_LEN, MAGIC, PREFIX_LEN,
};
pub use kdf::{derive_key, KdfParams};
pub use keys::{FileKey, Salt, WrappingKey};
