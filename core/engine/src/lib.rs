//! Bulk retroactive encryption engine.
//!
//! Drives a one-time (and safely re-runnable) pass over a multi-user file
//! tree:
//! 1. provision key material, per user or a single master key
//! 2. walk every user's files and encrypt each plain file in place
//! 3. hand newly generated one-time passwords to the operator or the users
//!
//! All durable state lives behind the collaborator traits of
//! `encryptall-keys` and `encryptall-storage`; the engine only owns the
//! orchestration policy.

pub mod config;
pub mod console;
pub mod gate;
pub mod notify;
pub mod orchestrator;
pub mod password;
pub mod provision;
pub mod report;
pub mod summary;
pub mod users;
pub mod walker;

#[cfg(test)]
mod fakes;

pub use config::RunConfig;
pub use console::{Console, NullConsole};
pub use encryptall_keys::KeyMode;
pub use gate::FileEncryptionGate;
pub use notify::{Notifier, SpoolNotifier};
pub use orchestrator::{Collaborators, EncryptAll, RunState};
pub use password::{
    PasswordGenerator, RandomGenerator, RandomSource, SeededRandom, SystemRandom,
    DEFAULT_PASSWORD_LENGTH,
};
pub use provision::{create_master_key, KeyProvisioner, PasswordRegistry, Provisioned};
pub use report::{CredentialOutcome, CredentialReporter};
pub use summary::{CredentialRecord, FailedFile, FailedUser, RunSummary};
pub use users::{StaticUserBackend, TreeUserBackend, UserBackend, UserManager};
pub use walker::TreeWalker;
