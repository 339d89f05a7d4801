//! Device connection and the device facade
//!
//! [`DeviceLink`] owns the single transport to a controller. Every read and
//! write, from every region and every variable, goes through its lock, and a
//! failed operation moves the link through `Recovering` (disconnect, connect)
//! before the error is handed back to the caller.
//!
//! [`Device`] composes the link with the configured memory regions and is the
//! factory for typed variables.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::memory::{MemoryRegion, RegionSpec};
use super::variable::{
    AnyVariable, ByteCodec, FloatCodec, IntegerCodec, ValueType, Variable, VariableCodec,
};
use crate::core::status::{ConnectionStatus, StatusReporter};
use crate::core::transport::{ConnectionState, DeviceTransport, TransportStats};
use crate::error::{LogoSrvError, Result};

enum Operation<'a> {
    Read { start: u16, buffer: &'a mut [u8] },
    Write { start: u16, data: &'a [u8] },
}

/// Serialized access to one controller
#[derive(Debug)]
pub struct DeviceLink {
    name: String,
    transport: tokio::sync::Mutex<Box<dyn DeviceTransport>>,
    state: Mutex<ConnectionState>,
    status: Option<Arc<StatusReporter>>,
}

impl DeviceLink {
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn DeviceTransport>,
        status: Option<Arc<StatusReporter>>,
    ) -> Self {
        Self {
            name: name.into(),
            transport: tokio::sync::Mutex::new(transport),
            state: Mutex::new(ConnectionState::Disconnected),
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub async fn stats(&self) -> TransportStats {
        self.transport.lock().await.stats()
    }

    /// Move to `next`, reporting changes of the externally visible state
    fn transition(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous == next {
            return;
        }
        debug!(device = %self.name, "Connection {} -> {}", previous, next);

        let Some(status) = &self.status else {
            return;
        };
        match (previous, next) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                status.connection(ConnectionStatus::Connected);
            },
            (ConnectionState::Recovering, ConnectionState::Disconnected) => {
                status.connection(ConnectionStatus::Disconnected);
            },
            _ => {},
        }
    }

    /// Connect unless already connected; returns whether the link is up
    pub async fn connect(&self) -> bool {
        let mut transport = self.transport.lock().await;
        if transport.is_connected() && self.is_connected() {
            return true;
        }
        self.transition(ConnectionState::Connecting);
        self.open(&mut transport).await
    }

    async fn open(&self, transport: &mut Box<dyn DeviceTransport>) -> bool {
        match transport.connect().await {
            Ok(()) => {
                info!(device = %self.name, "Connected to {}", transport.name());
                self.transition(ConnectionState::Connected);
                true
            },
            Err(e) => {
                warn!(
                    device = %self.name,
                    "Connect to {} failed: error code 0x{:08X} {}",
                    transport.name(), e.code(), e
                );
                self.transition(ConnectionState::Disconnected);
                false
            },
        }
    }

    /// Tear the connection down and open it again
    pub async fn reconnect(&self) -> bool {
        let mut transport = self.transport.lock().await;
        self.recover(&mut transport).await
    }

    async fn recover(&self, transport: &mut Box<dyn DeviceTransport>) -> bool {
        let was_connected = self.is_connected();
        self.transition(ConnectionState::Recovering);
        info!(device = %self.name, "Reconnecting to {}", transport.name());
        if let Err(e) = transport.disconnect().await {
            debug!(device = %self.name, "Disconnect before reconnect failed: {}", e);
        }
        match transport.connect().await {
            Ok(()) => {
                info!(device = %self.name, "Reconnected to {}", transport.name());
                if !was_connected {
                    // Coming back from a failed start counts as a fresh connect
                    self.transition(ConnectionState::Connecting);
                }
                self.transition(ConnectionState::Connected);
                true
            },
            Err(e) => {
                warn!(
                    device = %self.name,
                    "Reconnect to {} failed: error code 0x{:08X} {}",
                    transport.name(), e.code(), e
                );
                self.transition(ConnectionState::Disconnected);
                false
            },
        }
    }

    /// Run one operation under the link lock.
    ///
    /// A failure is logged with `caller`, triggers one reconnect and is then
    /// returned; retry policy belongs to the caller.
    async fn execute(&self, caller: &str, operation: Operation<'_>) -> Result<()> {
        let mut transport = self.transport.lock().await;
        let result = match operation {
            Operation::Read { start, buffer } => transport.read_area(start, buffer).await,
            Operation::Write { start, data } => transport.write_area(start, data).await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    device = %self.name,
                    caller,
                    "Error code 0x{:08X} {}", e.code(), e
                );
                self.recover(&mut transport).await;
                Err(e.into())
            },
        }
    }

    pub async fn read(&self, caller: &str, start: u16, buffer: &mut [u8]) -> Result<()> {
        self.execute(caller, Operation::Read { start, buffer }).await
    }

    pub async fn write(&self, caller: &str, start: u16, data: &[u8]) -> Result<()> {
        self.execute(caller, Operation::Write { start, data }).await
    }

    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            warn!(device = %self.name, "Disconnect failed: {}", e);
        }
        *self.state.lock() = ConnectionState::Disconnected;
    }
}

/// One LOGO! controller with its polled memory regions
#[derive(Debug)]
pub struct Device {
    name: String,
    link: Arc<DeviceLink>,
    /// Fastest polling first
    regions: Vec<Arc<MemoryRegion>>,
    status: Option<Arc<StatusReporter>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl Device {
    /// Build a device; regions must not overlap
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn DeviceTransport>,
        ranges: &[RegionSpec],
        status: Option<Arc<StatusReporter>>,
    ) -> Result<Self> {
        let name = name.into();
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if a.overlaps(b) {
                    return Err(LogoSrvError::config(format!(
                        "Memory ranges {}..{} and {}..{} overlap",
                        a.start, a.end, b.start, b.end
                    )));
                }
            }
        }

        let mut regions = ranges
            .iter()
            .map(|spec| MemoryRegion::new(name.clone(), *spec).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        regions.sort_by_key(|r| (r.interval(), r.start()));

        let link = Arc::new(DeviceLink::new(name.clone(), transport, status.clone()));
        Ok(Self {
            name,
            link,
            regions,
            status,
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn regions(&self) -> &[Arc<MemoryRegion>] {
        &self.regions
    }

    pub fn status(&self) -> Option<&Arc<StatusReporter>> {
        self.status.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Spawn the region loops once; polling stays paused until enabled
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for region in &self.regions {
            region.spawn(self.link.clone(), self.status.clone());
        }
    }

    /// Connect to the controller and enable polling.
    ///
    /// Idempotent; returns false when the connect call fails.
    pub async fn connect(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            warn!(device = %self.name, "Connect on a disposed device ignored");
            return false;
        }
        self.start();
        if !self.link.connect().await {
            return false;
        }
        self.enable_polling(true);
        true
    }

    pub fn enable_polling(&self, enabled: bool) {
        for region in &self.regions {
            region.enable_update(enabled);
        }
    }

    /// Region holding `[address, address + length)`
    pub fn region_for(&self, address: i32, length: usize) -> Result<&Arc<MemoryRegion>> {
        if address < 0 {
            return Err(LogoSrvError::invalid_address(format!(
                "Address {} is negative",
                address
            )));
        }
        self.regions
            .iter()
            .find(|r| r.contains(address as usize, length))
            .ok_or_else(|| {
                LogoSrvError::out_of_range(format!(
                    "No memory range of {} holds {} bytes at address {}",
                    self.name, length, address
                ))
            })
    }

    fn typed<C: VariableCodec>(&self, address: i32) -> Result<Variable<C>> {
        let region = self.region_for(address, C::WIDTH)?;
        Ok(Variable::new(
            region.clone(),
            self.link.clone(),
            address as usize,
        ))
    }

    pub fn byte_at(&self, address: i32) -> Result<Variable<ByteCodec>> {
        self.typed(address)
    }

    pub fn integer_at(&self, address: i32) -> Result<Variable<IntegerCodec>> {
        self.typed(address)
    }

    pub fn float_at(&self, address: i32) -> Result<Variable<FloatCodec>> {
        self.typed(address)
    }

    pub fn variable(&self, address: i32, value_type: ValueType) -> Result<AnyVariable> {
        Ok(match value_type {
            ValueType::Byte => AnyVariable::Byte(self.byte_at(address)?),
            ValueType::Integer => AnyVariable::Integer(self.integer_at(address)?),
            ValueType::Float => AnyVariable::Float(self.float_at(address)?),
        })
    }

    /// Stop polling, wait for the region loops, then disconnect
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enable_polling(false);
        for region in &self.regions {
            region.dispose().await;
        }
        self.link.disconnect().await;
        if let Some(status) = &self.status {
            status.connection(ConnectionStatus::Disconnected);
        }
        info!(device = %self.name, "Device disposed");
    }
}
