/// Unified error handling for the cancela proxy
///
/// Backend-facing failures are absorbed at the pool/session boundary and
/// surfaced to clients as fixed replies (see `protocol::reply`); the types
/// here carry the detail for logs and for the startup path.

use std::fmt;
use std::io;
use std::net::AddrParseError;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for cancela operations
#[derive(Debug, Error)]
pub enum CancelaError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed bytes on a client or backend connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend connection or round trip errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// No group owns a key, or no servant in the group is usable
    #[error("Routing error: {message}")]
    Routing { message: String },

    /// Missing or incorrect credential
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Address parsing errors
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] AddrParseError),

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for cancela operations
pub type CancelaResult<T> = Result<T, CancelaError>;

/// Convenience methods for creating specific error types
impl CancelaError {
    /// Create a backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        CancelaError::Backend {
            message: message.into(),
        }
    }

    /// Create a routing error
    pub fn routing<S: Into<String>>(message: S) -> Self {
        CancelaError::Routing {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        CancelaError::Auth {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        CancelaError::Protocol(message.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        CancelaError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        CancelaError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the backend may come back)
    pub fn is_recoverable(&self) -> bool {
        match self {
            CancelaError::Network(_) => true,
            CancelaError::Backend { .. } => true,
            CancelaError::Routing { .. } => true,
            CancelaError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CancelaError::Config(_) => ErrorSeverity::Critical,
            CancelaError::Internal { .. } => ErrorSeverity::Critical,
            CancelaError::Network(_) => ErrorSeverity::Warning,
            CancelaError::Backend { .. } => ErrorSeverity::Warning,
            CancelaError::Routing { .. } => ErrorSeverity::Warning,
            CancelaError::Timeout { .. } => ErrorSeverity::Warning,
            CancelaError::Auth { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = CancelaError::backend("Backend unavailable");
        assert!(matches!(error, CancelaError::Backend { .. }));
        assert_eq!(error.to_string(), "Backend error: Backend unavailable");

        let error = CancelaError::routing("no group for key");
        assert_eq!(error.to_string(), "Routing error: no group for key");
    }

    #[test]
    fn test_error_severity() {
        let config_error = CancelaError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let network_error =
            CancelaError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert_eq!(network_error.severity(), ErrorSeverity::Warning);

        assert_eq!(CancelaError::auth("bad").severity(), ErrorSeverity::Info);
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_error_recoverability() {
        let network_error =
            CancelaError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert!(network_error.is_recoverable());
        assert!(CancelaError::routing("down").is_recoverable());

        let config_error = CancelaError::Config(ConfigError::ValidationError("test".to_string()));
        assert!(!config_error.is_recoverable());
        assert!(!CancelaError::protocol("bad tag").is_recoverable());
    }
}
