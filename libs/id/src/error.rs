//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty (or only whitespace).
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The ID contains whitespace between non-blank characters.
    #[error("{kind} contains whitespace: '{actual}'")]
    EmbeddedWhitespace { kind: &'static str, actual: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
