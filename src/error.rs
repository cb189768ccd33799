//! Error types for transcribe_dispatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    // Lookups
    #[error("{what} not found")]
    NotFound { what: String },

    // Caller input
    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("nothing to update")]
    NothingToUpdate,

    // Store
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Unsupported database version: '{found}', expected '{expected}'")]
    SchemaVersion { found: String, expected: String },

    // Collaborators
    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    // Request scope
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,

    // Configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DispatchError::NotFound { what: what.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation {
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        DispatchError::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DispatchError::Validation { .. } | DispatchError::NothingToUpdate
        )
    }

    /// Whether the caller may retry the same request unchanged.
    /// The store guarantees nothing was committed for these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Persistence(_)
                | DispatchError::DeadlineExceeded
                | DispatchError::Cancelled
                | DispatchError::ExternalService { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_update_is_validation() {
        let err = DispatchError::NothingToUpdate;
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "nothing to update");
    }

    #[test]
    fn test_not_found_display() {
        let err = DispatchError::not_found("audio file 42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "audio file 42 not found");
    }

    #[test]
    fn test_external_is_retryable() {
        let err = DispatchError::external("chunker", "502 Bad Gateway");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("chunker"));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_persistence_from_sqlx() {
        let err: DispatchError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DispatchError::Persistence(_)));
        assert!(err.is_retryable());
    }
}
