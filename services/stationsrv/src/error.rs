//! Error handling for the station controller service
//!
//! One error type for the whole service; transport failures from the field
//! bus are wrapped rather than redefined.

use fieldbus::BusError;
use thiserror::Error;

/// Result type for stationsrv operations
pub type Result<T> = std::result::Result<T, StationError>;

/// Station controller errors
#[derive(Debug, Error, Clone)]
pub enum StationError {
    /// Register transport errors, retries already exhausted
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Expected physical confirmation never arrived
    #[error("Sensor wait timed out: {0}")]
    SensorTimeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry port errors
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Routing sink errors
    #[error("Routing error: {0}")]
    Routing(String),

    /// Cooperative shutdown requested, not a fault
    #[error("Cancelled")]
    Cancelled,
}

impl From<serde_yaml::Error> for StationError {
    fn from(err: serde_yaml::Error) -> Self {
        StationError::Config(format!("YAML error: {}", err))
    }
}

impl From<rumqttc::ClientError> for StationError {
    fn from(err: rumqttc::ClientError) -> Self {
        StationError::Telemetry(err.to_string())
    }
}

// Helper methods for creating errors
impl StationError {
    pub fn sensor_timeout(msg: impl Into<String>) -> Self {
        StationError::SensorTimeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        StationError::Config(msg.into())
    }

    pub fn telemetry(msg: impl Into<String>) -> Self {
        StationError::Telemetry(msg.into())
    }

    pub fn routing(msg: impl Into<String>) -> Self {
        StationError::Routing(msg.into())
    }

    /// True for errors that halt the station rather than end it cleanly
    pub fn is_fault(&self) -> bool {
        !matches!(self, StationError::Cancelled)
    }
}
