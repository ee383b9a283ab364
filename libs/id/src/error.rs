//! Identifier parse errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    /// Not of the form `rootfs_<ulid>`.
    #[error("'{0}' is not a rootfs id")]
    NotRootfs(String),

    #[error("rootfs id '{value}' has a malformed ULID: {reason}")]
    MalformedUlid { value: String, reason: String },

    /// A container id level that cannot be used as a directory name.
    #[error("invalid container id component '{value}': {reason}")]
    InvalidComponent { value: String, reason: &'static str },
}

impl IdError {
    /// True for empty input, including an empty nesting level.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
