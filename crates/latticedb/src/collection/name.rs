//! Validated collection names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Longest accepted name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Name of a collection, checked once at the registry boundary.
///
/// Each collection gets a directory of the same name under the database
/// root, so only ASCII alphanumerics, `_` and `-` are accepted.
///
/// # Example
///
/// ```
/// use latticedb::CollectionName;
///
/// let name = CollectionName::new("articles-2024").unwrap();
/// assert_eq!(name.to_string(), "articles-2024");
/// assert!(CollectionName::new("../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Check `name` and wrap it.
    ///
    /// # Errors
    ///
    /// [`CollectionNameError`] naming the first rule the input breaks.
    pub fn new(name: impl Into<String>) -> Result<Self, CollectionNameError> {
        let name = name.into();
        match name.len() {
            0 => Err(CollectionNameError::Empty),
            len if len > MAX_NAME_LEN => Err(CollectionNameError::TooLong(len)),
            _ if name.bytes().any(|b| !is_name_byte(b)) => {
                Err(CollectionNameError::InvalidCharacters(name))
            }
            _ => Ok(Self(name)),
        }
    }

    /// Borrow the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

const fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionName {
    type Error = CollectionNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(name: CollectionName) -> Self {
        name.0
    }
}

/// Why a string was refused as a collection name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionNameError {
    /// Zero-length input.
    #[error("collection name is empty")]
    Empty,

    /// The name contains characters other than ASCII alphanumerics, `_` and `-`.
    #[error("collection name {0:?} contains invalid characters (allowed: a-z, A-Z, 0-9, _, -)")]
    InvalidCharacters(String),

    /// The name is longer than [`MAX_NAME_LEN`] bytes.
    #[error("collection name is too long ({0} bytes, max {MAX_NAME_LEN})")]
    TooLong(usize),
}

impl From<CollectionNameError> for Error {
    fn from(err: CollectionNameError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
