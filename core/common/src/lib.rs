//! Common utilities and types shared across the encrypt-all workspace.
//!
//! This module provides foundational types that are used throughout the codebase:
//! the shared error type, user identities, namespace paths and one-time passwords.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FsPath, OneTimePassword, UserId};
