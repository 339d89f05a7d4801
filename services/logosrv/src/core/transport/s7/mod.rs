//! S7 (ISO-on-TCP) transport for LOGO! controllers
//!
//! LOGO! 0BA7 and later answer S7 read/write var jobs on TCP port 102 and map
//! their variable memory (VM) onto data block 1. This transport speaks just
//! enough of the protocol to move VM bytes.

pub mod frame;

use async_trait::async_trait;
use common::hex::format_hex_pretty;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::traits::{DeviceTransport, TransportError, TransportStats};
use frame::TpktHeader;

/// S7 transport configuration
#[derive(Debug, Clone)]
pub struct S7Config {
    pub host: String,
    pub port: u16,
    pub local_tsap: u16,
    pub remote_tsap: u16,
    /// Data block the VM is mapped to
    pub db_number: u16,
    /// Connect and per-telegram timeout
    pub timeout: Duration,
    /// PDU length requested during setup communication
    pub requested_pdu: u16,
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 102,
            local_tsap: 0x0200,
            remote_tsap: 0x0200,
            db_number: 1,
            timeout: Duration::from_secs(3),
            requested_pdu: frame::DEFAULT_PDU_LENGTH,
        }
    }
}

impl S7Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::ConfigError(
                "Host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(TransportError::ConfigError(
                "Port cannot be zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::ConfigError(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// S7 transport over one TCP connection
#[derive(Debug)]
pub struct S7Transport {
    config: S7Config,
    endpoint: String,
    stream: Option<TcpStream>,
    pdu_length: u16,
    pdu_ref: u16,
    stats: TransportStats,
}

impl S7Transport {
    pub fn new(config: S7Config) -> Result<Self, TransportError> {
        config.validate()?;
        let endpoint = format!("{}:{}", config.host, config.port);
        Ok(Self {
            config,
            endpoint,
            stream: None,
            pdu_length: 0,
            pdu_ref: 0,
            stats: TransportStats::default(),
        })
    }

    /// PDU length negotiated with the controller, 0 while disconnected
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    /// Send one telegram and wait for its answer.
    ///
    /// Any failure drops the socket; the stream position is unknown afterwards.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let io_timeout = self.config.timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        trace!(hex_data = %format_hex_pretty(request), direction = "send", "[S7] Raw packet");
        let result = match timeout(io_timeout, exchange_on(stream, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "No answer within {:?}",
                io_timeout
            ))),
        };

        match result {
            Ok(answer) => {
                trace!(hex_data = %format_hex_pretty(&answer), direction = "recv", "[S7] Raw packet");
                Ok(answer)
            },
            Err(e) => {
                warn!("[S7] {} exchange failed: {}", self.endpoint, e);
                self.stream = None;
                self.pdu_length = 0;
                self.stats.record_disconnection();
                Err(e)
            },
        }
    }

    async fn handshake(&mut self) -> Result<u16, TransportError> {
        let request = frame::connection_request(self.config.local_tsap, self.config.remote_tsap);
        let answer = self.exchange(&request).await?;
        frame::check_connection_confirm(&answer)?;

        let pdu_ref = self.next_pdu_ref();
        let request = frame::setup_communication(pdu_ref, self.config.requested_pdu);
        let answer = self.exchange(&request).await?;
        frame::parse_setup_response(&answer)
    }
}

async fn exchange_on(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>, TransportError> {
    stream
        .write_all(request)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;

    let mut header = [0u8; frame::TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let tpkt = TpktHeader::from_bytes(&header)?;

    let mut packet = vec![0u8; tpkt.length as usize];
    packet[..frame::TPKT_HEADER_LEN].copy_from_slice(&header);
    stream
        .read_exact(&mut packet[frame::TPKT_HEADER_LEN..])
        .await?;
    Ok(packet)
}

#[async_trait]
impl DeviceTransport for S7Transport {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.stats.record_connection_attempt();
        debug!("[S7] Connecting to {}", self.endpoint);

        let stream = match timeout(self.config.timeout, TcpStream::connect(&self.endpoint)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.record_failed_connection();
                return Err(TransportError::ConnectionFailed(format!(
                    "Failed to connect to {}: {}",
                    self.endpoint, e
                )));
            },
            Err(_) => {
                self.stats.record_failed_connection();
                return Err(TransportError::Timeout(format!(
                    "Connection to {} timed out",
                    self.endpoint
                )));
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("[S7] Failed to set TCP_NODELAY: {}", e);
        }
        self.stream = Some(stream);

        match self.handshake().await {
            Ok(pdu_length) => {
                self.pdu_length = pdu_length;
                self.stats.record_successful_connection();
                info!(
                    "[S7] Connected to {} (PDU length {})",
                    self.endpoint, pdu_length
                );
                Ok(())
            },
            Err(e) => {
                self.stream = None;
                self.pdu_length = 0;
                self.stats.record_failed_connection();
                Err(e)
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("[S7] Error during shutdown of {}: {}", self.endpoint, e);
            }
            self.stats.record_disconnection();
            info!("[S7] Disconnected from {}", self.endpoint);
        }
        self.pdu_length = 0;
        Ok(())
    }

    async fn read_area(&mut self, start: u16, buffer: &mut [u8]) -> Result<(), TransportError> {
        let chunk = frame::max_read_chunk(self.pdu_length);
        if self.stream.is_none() || chunk == 0 {
            return Err(TransportError::NotConnected);
        }

        let mut offset = 0usize;
        while offset < buffer.len() {
            let count = chunk.min(buffer.len() - offset);
            let pdu_ref = self.next_pdu_ref();
            let request = frame::read_request(
                pdu_ref,
                self.config.db_number,
                u32::from(start) + offset as u32,
                count as u16,
            );
            let answer = match self.exchange(&request).await {
                Ok(answer) => answer,
                Err(e) => {
                    self.stats.record_failure();
                    return Err(e);
                },
            };
            match frame::parse_read_response(&answer, count) {
                Ok(data) => buffer[offset..offset + count].copy_from_slice(data),
                Err(e) => {
                    self.stats.record_failure();
                    return Err(e);
                },
            }
            offset += count;
        }

        self.stats.record_read(buffer.len());
        Ok(())
    }

    async fn write_area(&mut self, start: u16, data: &[u8]) -> Result<(), TransportError> {
        let chunk = frame::max_write_chunk(self.pdu_length);
        if self.stream.is_none() || chunk == 0 {
            return Err(TransportError::NotConnected);
        }

        for (index, part) in data.chunks(chunk).enumerate() {
            let pdu_ref = self.next_pdu_ref();
            let request = frame::write_request(
                pdu_ref,
                self.config.db_number,
                u32::from(start) + (index * chunk) as u32,
                part,
            );
            let result = match self.exchange(&request).await {
                Ok(answer) => frame::check_write_response(&answer),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.stats.record_failure();
                return Err(e);
            }
        }

        self.stats.record_write(data.len());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
