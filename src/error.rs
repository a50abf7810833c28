//! Error types and handling for Helios
//!
//! This module defines the error types used throughout the controller,
//! including the two sentinels capabilities use to steer the control loop.

use thiserror::Error;

/// Result type alias for Helios operations
pub type Result<T> = std::result::Result<T, HeliosError>;

/// Main error type for Helios
#[derive(Debug, Clone, Error)]
pub enum HeliosError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Charger command or status errors
    #[error("Charger error: {message}")]
    Charger { message: String },

    /// Meter read errors
    #[error("Meter error: {message}")]
    Meter { message: String },

    /// Vehicle API errors
    #[error("Vehicle error: {message}")]
    Vehicle { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// The value is not available yet; the caller should retry on the next tick
    #[error("must retry")]
    MustRetry,

    /// The requested feature is not available on this device right now
    #[error("not available")]
    NotAvailable,

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HeliosError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HeliosError::Config {
            message: message.into(),
        }
    }

    /// Create a new charger error
    pub fn charger<S: Into<String>>(message: S) -> Self {
        HeliosError::Charger {
            message: message.into(),
        }
    }

    /// Create a new meter error
    pub fn meter<S: Into<String>>(message: S) -> Self {
        HeliosError::Meter {
            message: message.into(),
        }
    }

    /// Create a new vehicle error
    pub fn vehicle<S: Into<String>>(message: S) -> Self {
        HeliosError::Vehicle {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HeliosError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HeliosError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HeliosError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HeliosError::Generic {
            message: message.into(),
        }
    }

    /// True for the sentinel asking for an immediate re-poll
    pub fn is_must_retry(&self) -> bool {
        matches!(self, HeliosError::MustRetry)
    }

    /// True for the sentinel signalling an unsupported feature
    pub fn is_not_available(&self) -> bool {
        matches!(self, HeliosError::NotAvailable)
    }
}

impl From<std::io::Error> for HeliosError {
    fn from(err: std::io::Error) -> Self {
        HeliosError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HeliosError {
    fn from(err: serde_yaml::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HeliosError {
    fn from(err: serde_json::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HeliosError::config("test config error");
        assert!(matches!(err, HeliosError::Config { .. }));

        let err = HeliosError::charger("test charger error");
        assert!(matches!(err, HeliosError::Charger { .. }));

        let err = HeliosError::validation("field", "test validation error");
        assert!(matches!(err, HeliosError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HeliosError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Configuration error: test error");

        let err = HeliosError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");
    }

    #[test]
    fn test_sentinels() {
        assert!(HeliosError::MustRetry.is_must_retry());
        assert!(!HeliosError::MustRetry.is_not_available());
        assert!(HeliosError::NotAvailable.is_not_available());
        assert!(!HeliosError::meter("x").is_must_retry());
    }
}
