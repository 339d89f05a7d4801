//! Status side channel
//!
//! A device reports its lifecycle under `{status topic}/{name}` on every MQTT
//! client that has a status section:
//!
//! - `Connection`: `connected`, `disconnected`, or `lost` (the last will)
//! - `Software` and `Version`: sent once with the first update
//! - `LastNotification`: time of the last delivered change notification
//!
//! Updates land in a pending list keyed by name and a background task drains
//! it when woken, so a burst of updates becomes one publish per name.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::config::StatusConfig;
use crate::core::mqtt::{LastWillMessage, MessagePublisher, QualityOfService};

pub const CONNECTION: &str = "Connection";
pub const SOFTWARE: &str = "Software";
pub const VERSION: &str = "Version";
pub const LAST_NOTIFICATION: &str = "LastNotification";

/// Values of the `Connection` status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Lost,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Target {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    qos: QualityOfService,
    retain: bool,
}

/// Coalescing publisher of device status values
pub struct StatusReporter {
    software: String,
    version: String,
    targets: Mutex<Vec<Target>>,
    pending: Mutex<Vec<(&'static str, String)>>,
    announced: AtomicBool,
    wake: Arc<Notify>,
    publishing: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("software", &self.software)
            .field("targets", &self.targets.lock().len())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl StatusReporter {
    /// Create the reporter and its drain task; needs a Tokio runtime
    pub fn new(software: impl Into<String>, version: impl Into<String>) -> Arc<Self> {
        let reporter = Arc::new(Self {
            software: software.into(),
            version: version.into(),
            targets: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            announced: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            publishing: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let worker = Arc::downgrade(&reporter);
        let wake = reporter.wake.clone();
        let cancel = reporter.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = wake.notified() => {},
                }
                match worker.upgrade() {
                    Some(reporter) => reporter.drain().await,
                    None => break,
                }
            }
        });
        *reporter.task.lock() = Some(task);
        reporter
    }

    /// Publish status through `publisher`, registering the `lost` last will
    pub fn add(&self, publisher: Arc<dyn MessagePublisher>, config: &StatusConfig) {
        publisher.set_last_will(LastWillMessage {
            topic: format!("{}/{}", config.topic, CONNECTION),
            payload: ConnectionStatus::Lost.as_str().to_string(),
            qos: config.qos,
            retain: config.retain,
        });
        debug!(
            client_id = %publisher.client_id(),
            topic = %config.topic,
            "Status channel added"
        );
        self.targets.lock().push(Target {
            publisher,
            topic: config.topic.clone(),
            qos: config.qos,
            retain: config.retain,
        });
    }

    pub fn target_count(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn connection(&self, status: ConnectionStatus) {
        self.update(CONNECTION, status.as_str().to_string());
    }

    /// Queue `Software`, `Version` and `Connection` again, e.g. once the
    /// MQTT clients are up and earlier updates may have been dropped
    pub fn announce(&self, status: ConnectionStatus) {
        self.announced.store(false, Ordering::Release);
        self.connection(status);
    }

    pub fn last_notification(&self) {
        self.update(
            LAST_NOTIFICATION,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    /// Queue `value` for `name`, replacing a value not yet sent
    pub fn update(&self, name: &'static str, value: String) {
        {
            let mut pending = self.pending.lock();
            if !self.announced.swap(true, Ordering::AcqRel) {
                pending.push((SOFTWARE, format!("{} {}", self.software, self.version)));
                pending.push((VERSION, self.version.clone()));
            }
            match pending.iter_mut().find(|(key, _)| *key == name) {
                Some(entry) => entry.1 = value,
                None => pending.push((name, value)),
            }
        }
        self.wake.notify_one();
    }

    /// Publish everything pending now
    pub async fn flush(&self) {
        self.drain().await;
    }

    async fn drain(&self) {
        let _publishing = self.publishing.lock().await;
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return;
        }
        let targets: Vec<_> = self
            .targets
            .lock()
            .iter()
            .map(|t| (t.publisher.clone(), t.topic.clone(), t.qos, t.retain))
            .collect();
        if targets.is_empty() {
            debug!("No status channel, {} updates dropped", batch.len());
            return;
        }

        for (name, value) in batch {
            let payload = Bytes::from(value);
            for (publisher, topic, qos, retain) in &targets {
                let topic = format!("{}/{}", topic, name);
                publisher.publish(&topic, payload.clone(), *qos, *retain).await;
            }
        }
    }

    /// Flush and stop the drain task
    pub async fn close(&self) {
        self.flush().await;
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Status task ended abnormally: {}", e);
            }
        }
    }
}
