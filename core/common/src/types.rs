//! Common types used throughout encrypt-all.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Name of the per-user directory that holds the user's files.
pub const FILES_DIRNAME: &str = "files";

/// Unique identifier for a user account.
///
/// Opaque to the engine; it is only ever used as a mapping key and as the
/// first component of the user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty
    /// - `id` must not contain path separators
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "UserId cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "UserId cannot contain separators: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// A path within the multi-user namespace, independent of the backend.
///
/// The first component names the owning user, so a user's files live
/// under `/<user>/files`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath {
    components: Vec<String>,
}

impl FsPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// The root of a user's file tree: `/<user>/files`.
    pub fn user_files_root(user: &UserId) -> Self {
        Self {
            components: vec![user.as_str().to_string(), FILES_DIRNAME.to_string()],
        }
    }

    /// Create a path from string components.
    ///
    /// # Preconditions
    /// - Components must not contain path separators
    /// - Components must not be empty strings, `.` or `..`
    ///
    /// # Errors
    /// - Returns error if any component is invalid
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into FsPath.
    ///
    /// Uses '/' as separator.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// The user owning this path, i.e. its first component.
    pub fn owner(&self) -> Option<UserId> {
        self.components
            .first()
            .and_then(|first| UserId::new(first.clone()).ok())
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &FsPath) -> bool {
        self.components.starts_with(&ancestor.components)
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "Relative path component not allowed: {}",
            comp
        )));
    }
    Ok(())
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl TryFrom<String> for FsPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<FsPath> for String {
    fn from(path: FsPath) -> Self {
        path.to_string_path()
    }
}

/// One-time password generated to seed a user's new key material.
///
/// Zeroized on drop and never printed through `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct OneTimePassword(String);

impl OneTimePassword {
    /// Wrap a generated password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// Reveal the password for hand-off to the operator or the user.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Get the length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for OneTimePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneTimePassword([REDACTED; {} chars])", self.len())
    }
}
