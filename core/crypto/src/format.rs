//! Sealed file format.
//!
//! ```text
//! +--------+-------------+----------------+-------------+---------------------+
//! | "EALL" | version u32 | header_len u32 | JSON header | nonce||ct||tag      |
//! +--------+-------------+----------------+-------------+---------------------+
//! ```
//!
//! Integers are big-endian. The header lists one sealed envelope per
//! recipient key. Magic, version and header are authenticated as
//! associated data of the payload.
//!
//! A file counts as sealed only when the magic, a known version and a
//! parseable header are all present. Everything else is a plain file of
//! version 0, including plain text that happens to start with the magic.

use crypto_box::PublicKey;
use serde::{Deserialize, Serialize};

use crate::aead;
use crate::envelope::{key_fingerprint, seal_dek, SealedEnvelope};
use crate::keys::FileKey;
use encryptall_common::{Error, Result};

/// File magic.
pub const MAGIC: &[u8; 4] = b"EALL";

/// Format version written by [`SealedFile::seal`].
pub const FORMAT_VERSION: u32 = 1;

/// Bytes holding the magic and the version.
pub const PREFIX_LEN: usize = 8;

const HEADER_LEN_SIZE: usize = 4;

/// Bytes holding the magic, the version and the header length.
pub const HEADER_PREFIX_LEN: usize = PREFIX_LEN + HEADER_LEN_SIZE;

/// One recipient of a sealed file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub key_id: String,
    pub envelope: SealedEnvelope,
}

#[derive(Serialize, Deserialize)]
struct Header {
    recipients: Vec<Recipient>,
}

/// A file encrypted for one or more public keys.
#[derive(Clone, Debug)]
pub struct SealedFile {
    pub version: u32,
    pub recipients: Vec<Recipient>,
    pub payload: Vec<u8>,
}

impl SealedFile {
    /// Encrypt `plaintext` under a fresh data key sealed to every recipient.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `recipients` is empty
    /// - `Error::Crypto` on sealing or encryption failure
    pub fn seal(plaintext: &[u8], recipients: &[&PublicKey]) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::InvalidInput(
                "A sealed file needs at least one recipient".to_string(),
            ));
        }

        let dek = FileKey::generate();
        let recipients = recipients
            .iter()
            .map(|public| {
                Ok(Recipient {
                    key_id: key_fingerprint(public),
                    envelope: seal_dek(&dek, public)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let header = encode_header(&recipients)?;
        let aad = associated_data(FORMAT_VERSION, &header);
        let payload = aead::encrypt(dek.as_bytes(), plaintext, &aad)?;

        Ok(Self {
            version: FORMAT_VERSION,
            recipients,
            payload,
        })
    }

    /// Serialize into the on-disk layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = encode_header(&self.recipients)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| Error::Serialization("Sealed file header too large".to_string()))?;

        let mut out =
            Vec::with_capacity(PREFIX_LEN + HEADER_LEN_SIZE + header.len() + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&header_len.to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse the on-disk layout without decrypting anything.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let version = peek_version(bytes);
        if version == 0 {
            return Err(Error::InvalidInput("Not a sealed file".to_string()));
        }

        let rest = &bytes[PREFIX_LEN..];
        if rest.len() < HEADER_LEN_SIZE {
            return Err(Error::Serialization("Truncated sealed file header".to_string()));
        }
        let (len_bytes, rest) = rest.split_at(HEADER_LEN_SIZE);
        let header_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if rest.len() < header_len {
            return Err(Error::Serialization("Truncated sealed file header".to_string()));
        }
        let (header, payload) = rest.split_at(header_len);
        let header: Header = serde_json::from_slice(header)?;

        Ok(Self {
            version,
            recipients: header.recipients,
            payload: payload.to_vec(),
        })
    }

    /// Envelope sealed for `key_id`, if that key is a recipient.
    pub fn envelope_for(&self, key_id: &str) -> Option<&SealedEnvelope> {
        self.recipients
            .iter()
            .find(|r| r.key_id == key_id)
            .map(|r| &r.envelope)
    }
}

/// Version claimed by the first bytes of a file.
///
/// Returns 0 unless the bytes start with the magic followed by a version
/// this build can read. A non-zero result is only a hint; use
/// [`sealed_version`] to decide whether a file is encrypted.
pub fn peek_version(bytes: &[u8]) -> u32 {
    if bytes.len() < PREFIX_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return 0;
    }
    let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if (1..=FORMAT_VERSION).contains(&version) {
        version
    } else {
        0
    }
}

/// Offset of the end of the header, if `bytes` start like a sealed file.
///
/// Callers reading files piecewise fetch [`HEADER_PREFIX_LEN`] bytes, then
/// this many bytes, and pass those to [`sealed_version`].
pub fn sealed_header_end(bytes: &[u8]) -> Option<usize> {
    if peek_version(bytes) == 0 || bytes.len() < HEADER_PREFIX_LEN {
        return None;
    }
    let header_len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    HEADER_PREFIX_LEN.checked_add(header_len as usize)
}

/// Encryption version of a file given at least its bytes up to the end of
/// the header. Returns 0 for plain files.
pub fn sealed_version(bytes: &[u8]) -> u32 {
    match SealedFile::from_bytes(bytes) {
        Ok(sealed) if !sealed.recipients.is_empty() => sealed.version,
        _ => 0,
    }
}

fn encode_header(recipients: &[Recipient]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Header {
        recipients: recipients.to_vec(),
    })?)
}

fn associated_data(version: u32, header: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(PREFIX_LEN + header.len());
    aad.extend_from_slice(MAGIC);
    aad.extend_from_slice(&version.to_be_bytes());
    aad.extend_from_slice(header);
    aad
}
