//! Polled memory regions
//!
//! A [`MemoryRegion`] caches one contiguous span `[start, end)` of the
//! controller's variable memory. Its poll loop reads the span through the
//! device link, swaps in a new [`MemoryImage`] (current and previous bytes of
//! the same cycle travel together, so readers always see one consistent pair)
//! and hands the subscriptions whose window changed to a dispatcher task.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::DeviceLink;
use super::notification::{
    changed_subscriptions, ChangeHandler, NotificationRegistry, Subscription, SubscriptionId,
};
use crate::core::config::{MEMORY_MAX, MEMORY_MIN};
use crate::core::status::StatusReporter;
use crate::error::{LogoSrvError, Result};

/// Consecutive read failures after which the region asks for a reconnect
pub const RECONNECT_THRESHOLD: u32 = 3;
/// Pause after a failed read
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Placement and cadence of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub start: usize,
    pub end: usize,
    pub interval: Duration,
}

impl RegionSpec {
    pub fn new(start: usize, end: usize, interval: Duration) -> Self {
        Self {
            start,
            end,
            interval,
        }
    }

    pub fn size(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn validate(&self) -> Result<()> {
        let max_size = MEMORY_MAX - MEMORY_MIN;
        if self.end < self.start || self.size() == 0 || self.size() > max_size {
            return Err(LogoSrvError::out_of_range(format!(
                "Region {}..{} must cover between 1 and {} bytes",
                self.start, self.end, max_size
            )));
        }
        if self.end > MEMORY_MAX {
            return Err(LogoSrvError::out_of_range(format!(
                "Region {}..{} exceeds memory end {}",
                self.start, self.end, MEMORY_MAX
            )));
        }
        if self.interval.is_zero() {
            return Err(LogoSrvError::config("Polling interval must be positive"));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &RegionSpec) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One completed poll cycle
#[derive(Debug, Clone)]
pub struct MemoryImage {
    /// Number of completed cycles, 0 before the first successful read
    pub cycle: u64,
    pub current: Vec<u8>,
    pub previous: Vec<u8>,
}

impl MemoryImage {
    fn empty(size: usize) -> Self {
        Self {
            cycle: 0,
            current: vec![0; size],
            previous: vec![0; size],
        }
    }
}

/// Subscriptions fired by one cycle, with the image that fired them
#[derive(Debug)]
struct Batch {
    image: Arc<MemoryImage>,
    fired: Vec<Arc<Subscription>>,
}

/// Cached, polled view of one span of variable memory
#[derive(Debug)]
pub struct MemoryRegion {
    device: String,
    spec: RegionSpec,
    image: ArcSwap<MemoryImage>,
    registry: NotificationRegistry,
    enabled: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryRegion {
    pub fn new(device: impl Into<String>, spec: RegionSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            device: device.into(),
            spec,
            image: ArcSwap::from_pointee(MemoryImage::empty(spec.size())),
            registry: NotificationRegistry::new(),
            enabled: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn start(&self) -> usize {
        self.spec.start
    }

    pub fn end(&self) -> usize {
        self.spec.end
    }

    pub fn size(&self) -> usize {
        self.spec.size()
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval
    }

    pub fn contains(&self, address: usize, length: usize) -> bool {
        address >= self.spec.start && address + length <= self.spec.end
    }

    /// Latest completed image
    pub fn image(&self) -> Arc<MemoryImage> {
        self.image.load_full()
    }

    /// Copy of `length` bytes at absolute `address` from the current image
    pub fn get_bytes(&self, address: i32, length: i32) -> Result<Vec<u8>> {
        let (address, length) = self.check_span(address, length)?;
        let offset = address - self.spec.start;
        Ok(self.image.load().current[offset..offset + length].to_vec())
    }

    fn check_span(&self, address: i32, length: i32) -> Result<(usize, usize)> {
        if address < 0 {
            return Err(LogoSrvError::invalid_address(format!(
                "Address {} is negative",
                address
            )));
        }
        let max_len = (MEMORY_MAX - MEMORY_MIN) as i32;
        if length < 1 || length > max_len {
            return Err(LogoSrvError::out_of_range(format!(
                "Length {} not in [1, {}]",
                length, max_len
            )));
        }
        let (address, length) = (address as usize, length as usize);
        if !self.contains(address, length) {
            return Err(LogoSrvError::out_of_range(format!(
                "Span {}..{} outside region {}..{}",
                address,
                address + length,
                self.spec.start,
                self.spec.end
            )));
        }
        Ok((address, length))
    }

    /// Register `handler` for changes of `[address, address + length)`
    pub fn subscribe_to_change(
        &self,
        address: i32,
        length: i32,
        handler: ChangeHandler,
    ) -> Result<SubscriptionId> {
        let (address, length) = self.check_span(address, length)?;
        let id = self
            .registry
            .subscribe(address - self.spec.start, length, handler);
        debug!(device = %self.device, address, length, id, "Change subscription added");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Pause or resume polling without stopping the loop
    pub fn enable_update(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_update_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Spawn the poll loop and its notification dispatcher
    pub(crate) fn spawn(
        self: &Arc<Self>,
        link: Arc<DeviceLink>,
        status: Option<Arc<StatusReporter>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(self.clone().poll_loop(link, tx));
        let dispatcher = tokio::spawn(dispatch_loop(rx, self.cancel.clone(), status));

        let mut tasks = self.tasks.lock();
        tasks.push(poller);
        tasks.push(dispatcher);
    }

    /// Cancel the loops, wait for them and drop all subscriptions
    pub async fn dispose(&self) {
        self.enable_update(false);
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(device = %self.device, "Region task ended abnormally: {}", e);
            }
        }
        self.registry.clear();
        debug!(
            device = %self.device,
            "Region {}..{} disposed", self.spec.start, self.spec.end
        );
    }

    /// Sleep unless cancelled first; returns true on cancellation
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn poll_loop(self: Arc<Self>, link: Arc<DeviceLink>, tx: mpsc::UnboundedSender<Batch>) {
        info!(
            device = %self.device,
            "Polling {}..{} every {:?}", self.spec.start, self.spec.end, self.spec.interval
        );
        let mut scratch = vec![0u8; self.size()];
        let mut failures = 0u32;

        while !self.cancel.is_cancelled() {
            if !self.is_update_enabled() {
                if self.pause(self.spec.interval).await {
                    break;
                }
                continue;
            }

            // Subscriptions added from here on wait for the next cycle
            let watched = self.registry.snapshot();

            if let Err(e) = link.read("poll", self.spec.start as u16, &mut scratch).await {
                failures += 1;
                warn!(
                    device = %self.device,
                    "Read of {}..{} failed ({} in a row): {}",
                    self.spec.start, self.spec.end, failures, e
                );
                if failures >= RECONNECT_THRESHOLD {
                    failures = 0;
                    link.reconnect().await;
                }
                if self.pause(FAILURE_BACKOFF).await {
                    break;
                }
                continue;
            }
            failures = 0;

            let batch = self.apply(&scratch, &watched);
            if !batch.fired.is_empty() && tx.send(batch).is_err() {
                break;
            }

            if self.pause(self.spec.interval).await {
                break;
            }
        }
        debug!(device = %self.device, "Poll loop for {}..{} stopped", self.spec.start, self.spec.end);
    }

    /// Publish `scratch` as the new current image and diff it
    fn apply(&self, scratch: &[u8], watched: &[Arc<Subscription>]) -> Batch {
        let last = self.image.load_full();
        let next = MemoryImage {
            cycle: last.cycle + 1,
            previous: last.current.clone(),
            current: scratch.to_vec(),
        };
        let fired = changed_subscriptions(watched, &next.current, &next.previous);
        let image = Arc::new(next);
        self.image.store(image.clone());
        Batch { image, fired }
    }
}

/// Runs change handlers one batch at a time, in poll order
async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Batch>,
    cancel: CancellationToken,
    status: Option<Arc<StatusReporter>>,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        for subscription in &batch.fired {
            if subscription.is_active() {
                subscription.fire(&batch.image.current).await;
            }
        }
        if let Some(status) = &status {
            status.last_notification();
        }
    }
}
