//! Final run summary.

use serde::Serialize;

use crate::report::CredentialOutcome;
use encryptall_common::{FsPath, UserId};
use encryptall_keys::KeyMode;

/// A file that stayed plain because encrypting it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: FsPath,
    pub reason: String,
}

/// A user whose provisioning or walk failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUser {
    pub user: UserId,
    pub reason: String,
}

/// How a user's new password was handed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRecord {
    pub user: UserId,
    #[serde(flatten)]
    pub outcome: CredentialOutcome,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: KeyMode,
    pub users_processed: u64,
    pub users_skipped: u64,
    pub files_encrypted: u64,
    /// Files already encrypted before this run.
    pub files_skipped: u64,
    pub failed_files: Vec<FailedFile>,
    pub failed_users: Vec<FailedUser>,
    pub credentials: Vec<CredentialRecord>,
}

impl RunSummary {
    pub fn new(mode: KeyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Whether every file and user was handled without error.
    pub fn is_clean(&self) -> bool {
        self.failed_files.is_empty() && self.failed_users.is_empty()
    }

    pub(crate) fn fail_user(&mut self, user: &UserId, reason: impl Into<String>) {
        self.failed_users.push(FailedUser {
            user: user.clone(),
            reason: reason.into(),
        });
    }

    pub(crate) fn fail_file(&mut self, path: &FsPath, reason: impl Into<String>) {
        self.failed_files.push(FailedFile {
            path: path.clone(),
            reason: reason.into(),
        });
    }
}
