//! Field-Bus Error Types
//!
//! Core error types for register transport operations.

use thiserror::Error;

/// Result type for fieldbus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Register transport errors
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// Connection establishment errors
    #[error("Connect error: {0}")]
    Connect(String),

    /// IO errors during an exchange
    #[error("IO error: {0}")]
    Io(String),

    /// Exchange exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request outside the device's register window
    #[error("Address out of range: {0}")]
    AddressRange(String),
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl BusError {
    pub fn connect(msg: impl Into<String>) -> Self {
        BusError::Connect(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        BusError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        BusError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        BusError::Protocol(msg.into())
    }

    pub fn address_range(msg: impl Into<String>) -> Self {
        BusError::AddressRange(msg.into())
    }

    /// Check if retrying the exchange can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BusError::Connect(_) | BusError::Io(_) | BusError::Timeout(_) => true,
            BusError::Protocol(_) | BusError::AddressRange(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::connect("refused by 192.168.200.231:502");
        assert_eq!(err.to_string(), "Connect error: refused by 192.168.200.231:502");

        let err = BusError::timeout("read_registers after 2000ms");
        assert!(err.to_string().starts_with("Timeout"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: BusError = io_err.into();
        assert!(matches!(err, BusError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BusError::connect("x").is_retryable());
        assert!(BusError::io("x").is_retryable());
        assert!(BusError::timeout("x").is_retryable());
        assert!(!BusError::protocol("x").is_retryable());
        assert!(!BusError::address_range("x").is_retryable());
    }
}
