//! Device transport traits
//!
//! A transport owns one connection to a controller and moves raw bytes of the
//! local variable memory in and out of it. Everything above this layer works
//! with byte offsets into that memory only.

use async_trait::async_trait;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation attempted without a connection
    #[error("Not connected")]
    NotConnected,

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Malformed or unexpected answer
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error code returned by the controller itself
    #[error("Device error 0x{code:08X}: {text}")]
    DeviceError { code: u32, text: String },
}

impl TransportError {
    /// Numeric error code, following the Snap7 client numbering
    pub fn code(&self) -> u32 {
        match self {
            TransportError::ConnectionFailed(_) => 0x0000_0003,
            TransportError::Timeout(_) => 0x0000_0004,
            TransportError::ReceiveFailed(_) | TransportError::IoError(_) => 0x0000_0005,
            TransportError::SendFailed(_) => 0x0000_0007,
            TransportError::ConnectionLost(_) => 0x0000_0008,
            TransportError::NotConnected => 0x0000_0009,
            TransportError::ConfigError(_) => 0x0020_0000,
            TransportError::ProtocolError(_) => 0x0080_0000,
            TransportError::DeviceError { code, .. } => *code,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                TransportError::ConnectionLost(err.to_string())
            },
            ErrorKind::UnexpectedEof => TransportError::ConnectionLost(err.to_string()),
            ErrorKind::TimedOut => TransportError::Timeout(err.to_string()),
            _ => TransportError::IoError(err.to_string()),
        }
    }
}

/// Connection lifecycle of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, nothing in progress
    Disconnected,
    /// Initial connect in progress
    Connecting,
    /// Connected and serving operations
    Connected,
    /// An operation failed; tearing down and connecting again
    Recovering,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Recovering => "recovering",
        };
        f.write_str(text)
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub reads: u64,
    pub writes: u64,
    pub failed_operations: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub last_connection: Option<SystemTime>,
}

impl TransportStats {
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
        self.last_connection = Some(SystemTime::now());
    }

    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
    }

    pub fn record_disconnection(&mut self) {
        self.disconnections += 1;
    }

    pub fn record_read(&mut self, bytes: usize) {
        self.reads += 1;
        self.bytes_read += bytes as u64;
    }

    pub fn record_write(&mut self, bytes: usize) {
        self.writes += 1;
        self.bytes_written += bytes as u64;
    }

    pub fn record_failure(&mut self) {
        self.failed_operations += 1;
    }
}

/// Access to one controller's local variable memory
///
/// Implementations are driven by a single owner at a time (`&mut self`); the
/// device connection serializes all callers in front of it.
#[async_trait]
pub trait DeviceTransport: Send + Sync + fmt::Debug {
    /// Human readable endpoint, used in logs
    fn name(&self) -> &str;

    /// Establish the connection
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Drop the connection; must succeed when already disconnected
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Read `buffer.len()` bytes starting at `start`
    async fn read_area(&mut self, start: u16, buffer: &mut [u8]) -> Result<(), TransportError>;

    /// Write `data` starting at `start`
    async fn write_area(&mut self, start: u16, data: &[u8]) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::default();
        stats.record_connection_attempt();
        stats.record_successful_connection();
        stats.record_read(16);
        stats.record_write(2);
        stats.record_failure();

        assert_eq!(stats.connection_attempts, 1);
        assert!(stats.last_connection.is_some());
        assert_eq!(stats.bytes_read, 16);
        assert_eq!(stats.bytes_written, 2);
        assert_eq!(stats.failed_operations, 1);
    }

    #[test]
    fn test_error_codes() {
        let err = TransportError::DeviceError {
            code: 0x00C0_0000,
            text: "Item not available".to_string(),
        };
        assert_eq!(err.code(), 0x00C0_0000);
        assert_eq!(err.to_string(), "Device error 0x00C00000: Item not available");
        assert_eq!(TransportError::NotConnected.code(), 9);
    }

    #[test]
    fn test_io_error_mapping() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, TransportError::ConnectionLost(_)));
    }
}
