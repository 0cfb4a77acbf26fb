//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the voter registry, providing the error
//! taxonomy shared by the store, the engines and the HTTP surface.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from storage, engines and request handling
//! - **Output**: Structured error types with context
//! - **Error Categories**: Validation, NotFound, RateLimited, Config, Storage
//!
//! ## Key Features
//! - Struct-variant errors with detailed context
//! - Automatic conversion from storage and serialization errors
//! - Category accessor for logging and response mapping

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Error taxonomy for the voter registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A caller-supplied value failed validation
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// An identifier did not resolve to a stored entity
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Request quota exceeded for the current window
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Embedded database errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Record (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Convenience constructor for validation failures
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for missing entities
    pub fn not_found(resource: &'static str, id: impl std::fmt::Display) -> Self {
        RegistryError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Check if the error is recoverable (can be retried by the caller)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RegistryError::RateLimited { .. })
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            RegistryError::Validation { .. } => "validation",
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::RateLimited { .. } => "rate_limit",
            RegistryError::Config { .. } => "configuration",
            RegistryError::Database(_) | RegistryError::Serialization(_) => "storage",
            RegistryError::Json(_) | RegistryError::Toml(_) => "serialization",
            RegistryError::Internal { .. } | RegistryError::Io(_) => "internal",
        }
    }
}

impl From<sled::transaction::TransactionError<RegistryError>> for RegistryError {
    fn from(err: sled::transaction::TransactionError<RegistryError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => RegistryError::Database(e),
        }
    }
}

/// Helper macro for internal errors with formatted messages
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::RegistryError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::RegistryError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = RegistryError::validation("status", "unknown value");
        assert_eq!(err.category(), "validation");

        let err = RegistryError::not_found("voter", "abc");
        assert_eq!(err.category(), "not_found");

        let err = RegistryError::RateLimited {
            retry_after_seconds: 60,
        };
        assert_eq!(err.category(), "rate_limit");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_not_found_display() {
        let err = RegistryError::not_found("category", "1234");
        assert_eq!(err.to_string(), "category not found: 1234");
    }
}
