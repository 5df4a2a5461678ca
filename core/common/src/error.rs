//! Common error types for encrypt-all.

use thiserror::Error;

/// Top-level error type for encrypt-all operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Key material is missing, unreadable or inconsistent.
    #[error("Key error: {0}")]
    Key(String),

    /// The master key could not be created or validated.
    ///
    /// This is the only error class that aborts a whole run.
    #[error("Master key error: {0}")]
    MasterKey(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Per-user setup (keys or working context) failed.
    #[error("User setup error: {0}")]
    UserSetup(String),

    /// Credential delivery failed.
    #[error("Notification error: {0}")]
    Notification(String),
}

impl Error {
    /// Whether this error must abort the entire run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MasterKey(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
