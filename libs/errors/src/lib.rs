//! Unified error handling for the logosrv bridge
//!
//! Every crate in the workspace can surface its failures as a [`BridgeError`].
//! Service crates keep their own domain error types and convert into this one
//! at the process boundary, so `main` has a single result type to report.

use thiserror::Error;

// ============================================================================
// BridgeError - Main error type
// ============================================================================

/// Main error type shared by all logosrv crates
#[derive(Debug, Error)]
pub enum BridgeError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Device & Message Bus Communication
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    // ======================================
    // File & Serialization Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {file}: {error}")]
    ParseError { file: String, error: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error category, used to pick the log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Protocol,
    Timeout,
    Validation,
    NotFound,
    Internal,
    Unknown,
}

impl BridgeError {
    /// Stable machine readable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::Io(_) => "IO_ERROR",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::ParseError { .. } => "PARSE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::ShutdownError(_) => "SHUTDOWN_ERROR",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::MissingConfig(_)
            | Self::ParseError { .. } => ErrorCategory::Configuration,

            Self::Communication(_) | Self::ConnectionFailed { .. } => ErrorCategory::Connection,

            Self::Protocol { .. } => ErrorCategory::Protocol,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::Validation(_) | Self::InvalidParameter { .. } | Self::OutOfRange { .. } => {
                ErrorCategory::Validation
            },

            Self::FileNotFound(_) => ErrorCategory::NotFound,

            Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::StartupFailed(_)
            | Self::ShutdownError(_)
            | Self::Runtime(_)
            | Self::Internal(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }

    /// Log level an error of this kind should be reported with
    pub fn log_level(&self) -> tracing::Level {
        match self.category() {
            ErrorCategory::Internal
            | ErrorCategory::Configuration
            | ErrorCategory::Validation
            | ErrorCategory::NotFound => tracing::Level::ERROR,
            ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::Protocol
            | ErrorCategory::Unknown => tracing::Level::WARN,
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<std::num::ParseIntError> for BridgeError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Validation(format!("Invalid integer: {}", err))
    }
}

impl From<std::num::ParseFloatError> for BridgeError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::Validation(format!("Invalid float: {}", err))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            BridgeError::Timeout("logo".into()).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            BridgeError::ConnectionFailed {
                endpoint: "10.0.0.1:102".into(),
                reason: "refused".into()
            }
            .category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            BridgeError::FileNotFound("logosrv.yaml".into()).log_level(),
            tracing::Level::ERROR
        );
        assert_eq!(
            BridgeError::Configuration("bad".into()).error_code(),
            "CONFIGURATION_ERROR"
        );
    }

    #[test]
    fn test_error_codes_and_levels() {
        let err = BridgeError::Protocol {
            protocol: "s7".into(),
            message: "short frame".into(),
        };
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
        assert_eq!(err.log_level(), tracing::Level::WARN);
        assert_eq!(err.to_string(), "Protocol error: s7: short frame");

        let err: BridgeError = "x".parse::<i32>().unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.to_string().contains("Invalid integer"));
    }

    #[test]
    fn test_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<Vec<u8>>("{ not: [a list").unwrap_err();
        let err: BridgeError = yaml_err.into();
        assert_eq!(err.error_code(), "DESERIALIZATION_ERROR");
    }
}
