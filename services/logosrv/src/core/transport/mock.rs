//! Mock transport for testing
//!
//! [`MockPlc`] is an in-memory stand-in for a controller's variable memory.
//! Every [`MockTransport`] built from the same `MockPlc` shares that memory, so
//! tests can poke bytes as the "PLC program" and observe what the bridge
//! wrote.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::traits::{DeviceTransport, TransportError, TransportStats};

/// Size of the LOGO! variable memory
pub const VM_SIZE: usize = 850;

#[derive(Debug)]
struct PlcState {
    memory: Vec<u8>,
    fail_connect: bool,
    /// Number of upcoming reads that fail; `u32::MAX` fails forever
    failing_reads: u32,
    fail_writes: bool,
    connects: u64,
    disconnects: u64,
    reads: u64,
    writes: u64,
    write_log: Vec<(u16, Vec<u8>)>,
}

/// Shared handle to a simulated controller
#[derive(Debug, Clone)]
pub struct MockPlc {
    state: Arc<Mutex<PlcState>>,
}

impl Default for MockPlc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlc {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlcState {
                memory: vec![0; VM_SIZE],
                fail_connect: false,
                failing_reads: 0,
                fail_writes: false,
                connects: 0,
                disconnects: 0,
                reads: 0,
                writes: 0,
                write_log: Vec::new(),
            })),
        }
    }

    /// Transport talking to this controller
    pub fn transport(&self) -> MockTransport {
        MockTransport::new(self.clone())
    }

    pub fn set_byte(&self, address: usize, value: u8) {
        self.set_bytes(address, &[value]);
    }

    pub fn set_bytes(&self, address: usize, data: &[u8]) {
        let mut state = self.state.lock();
        state.memory[address..address + data.len()].copy_from_slice(data);
    }

    pub fn get(&self, address: usize, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        state.memory[address..address + len].to_vec()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Fail the next `count` reads
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Fail all reads until cleared
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().failing_reads = if fail { u32::MAX } else { 0 };
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    pub fn disconnects(&self) -> u64 {
        self.state.lock().disconnects
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Every successful write as `(start, data)`, oldest first
    pub fn write_log(&self) -> Vec<(u16, Vec<u8>)> {
        self.state.lock().write_log.clone()
    }
}

/// Transport bound to a [`MockPlc`]
#[derive(Debug)]
pub struct MockTransport {
    plc: MockPlc,
    name: String,
    connected: bool,
    /// Simulated latency of each read
    read_delay: Duration,
    stats: TransportStats,
}

impl MockTransport {
    pub fn new(plc: MockPlc) -> Self {
        Self {
            plc,
            name: "mock-plc".to_string(),
            connected: false,
            read_delay: Duration::ZERO,
            stats: TransportStats::default(),
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    fn check_span(start: u16, len: usize) -> Result<(), TransportError> {
        if start as usize + len > VM_SIZE {
            return Err(TransportError::DeviceError {
                code: 0x0090_0000,
                text: format!("Address out of range ({} + {})", start, len),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stats.record_connection_attempt();
        let mut state = self.plc.state.lock();
        if state.fail_connect {
            self.stats.record_failed_connection();
            return Err(TransportError::ConnectionFailed(
                "Simulated connection failure".to_string(),
            ));
        }
        state.connects += 1;
        self.connected = true;
        self.stats.record_successful_connection();
        debug!("Mock transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.plc.state.lock().disconnects += 1;
            self.connected = false;
            self.stats.record_disconnection();
        }
        Ok(())
    }

    async fn read_area(&mut self, start: u16, buffer: &mut [u8]) -> Result<(), TransportError> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Self::check_span(start, buffer.len())?;

        let mut state = self.plc.state.lock();
        if state.failing_reads > 0 {
            if state.failing_reads != u32::MAX {
                state.failing_reads -= 1;
            }
            self.stats.record_failure();
            return Err(TransportError::Timeout(
                "Simulated read failure".to_string(),
            ));
        }
        let start = start as usize;
        buffer.copy_from_slice(&state.memory[start..start + buffer.len()]);
        state.reads += 1;
        self.stats.record_read(buffer.len());
        Ok(())
    }

    async fn write_area(&mut self, start: u16, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Self::check_span(start, data.len())?;

        let mut state = self.plc.state.lock();
        if state.fail_writes {
            self.stats.record_failure();
            return Err(TransportError::SendFailed(
                "Simulated write failure".to_string(),
            ));
        }
        let offset = start as usize;
        state.memory[offset..offset + data.len()].copy_from_slice(data);
        state.writes += 1;
        state.write_log.push((start, data.to_vec()));
        self.stats.record_write(data.len());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
