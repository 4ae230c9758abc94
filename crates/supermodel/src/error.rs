#![forbid(unsafe_code)]

//! Error taxonomy for the reactive store.
//!
//! Store reads, writes and deletes never fail. Only validator registration
//! and async reads that outlive their key can produce an error; handler
//! faults are panics and follow the dispatch rules in [`crate::emitter`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A validator failed its registration probe and was not stored.
    #[error("validator for `{key}` rejected: {reason}")]
    InvalidValidator { key: String, reason: String },

    /// The key was deleted while an async read was still waiting for it.
    #[error("key `{key}` was deleted before it was set")]
    KeyDeleted { key: String },

    /// The model behind a handle has already been dropped.
    #[error("model has been dropped")]
    Detached,
}

impl StoreError {
    #[must_use]
    pub fn invalid_validator(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValidator {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn key_deleted(key: impl Into<String>) -> Self {
        Self::KeyDeleted { key: key.into() }
    }

    /// The key this error refers to, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::InvalidValidator { key, .. } | Self::KeyDeleted { key } => Some(key),
            Self::Detached => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_key() {
        let err = StoreError::invalid_validator("email", "probe returned a string");
        assert_eq!(
            err.to_string(),
            "validator for `email` rejected: probe returned a string"
        );
        assert_eq!(err.key(), Some("email"));
    }

    #[test]
    fn detached_has_no_key() {
        assert_eq!(StoreError::Detached.key(), None);
        assert_eq!(
            StoreError::key_deleted("ready").to_string(),
            "key `ready` was deleted before it was set"
        );
    }
}
