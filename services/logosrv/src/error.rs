//! Error handling for the LOGO! bridge service

use errors::BridgeError;
use thiserror::Error;

use crate::core::transport::TransportError;

/// Bridge service error type
#[derive(Error, Debug, Clone)]
pub enum LogoSrvError {
    /// Configuration and wiring errors, fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Device or broker connection errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Device protocol errors reported by the transport
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Negative or otherwise unusable address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Address span outside a memory region
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Payload that does not decode to the expected value type
    #[error("Data error: {0}")]
    DataError(String),

    /// Operation not allowed in the current lifecycle state
    #[error("State error: {0}")]
    StateError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the bridge service
pub type Result<T> = std::result::Result<T, LogoSrvError>;

impl LogoSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        LogoSrvError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        LogoSrvError::ConnectionError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        LogoSrvError::ProtocolError(msg.into())
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        LogoSrvError::InvalidAddress(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        LogoSrvError::OutOfRange(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        LogoSrvError::DataError(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        LogoSrvError::StateError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        LogoSrvError::IoError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LogoSrvError::InternalError(msg.into())
    }
}

impl From<TransportError> for LogoSrvError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConfigError(msg) => LogoSrvError::ConfigError(msg),
            TransportError::ProtocolError(_) | TransportError::DeviceError { .. } => {
                LogoSrvError::ProtocolError(err.to_string())
            },
            other => LogoSrvError::ConnectionError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for LogoSrvError {
    fn from(err: std::io::Error) -> Self {
        LogoSrvError::IoError(err.to_string())
    }
}

impl From<figment::Error> for LogoSrvError {
    fn from(err: figment::Error) -> Self {
        LogoSrvError::ConfigError(err.to_string())
    }
}

impl From<LogoSrvError> for BridgeError {
    fn from(err: LogoSrvError) -> Self {
        match err {
            LogoSrvError::ConfigError(msg) => BridgeError::Configuration(msg),
            LogoSrvError::ConnectionError(msg) => BridgeError::Communication(msg),
            LogoSrvError::ProtocolError(msg) => BridgeError::Protocol {
                protocol: "s7".to_string(),
                message: msg,
            },
            LogoSrvError::InvalidAddress(msg) => BridgeError::InvalidParameter {
                param: "address".to_string(),
                reason: msg,
            },
            LogoSrvError::OutOfRange(msg) | LogoSrvError::DataError(msg) => {
                BridgeError::Validation(msg)
            },
            LogoSrvError::StateError(msg) => BridgeError::Runtime(msg),
            LogoSrvError::IoError(msg) => BridgeError::Io(std::io::Error::other(msg)),
            LogoSrvError::InternalError(msg) => BridgeError::Internal(msg),
        }
    }
}
