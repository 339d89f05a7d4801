//! Shared helpers for the logosrv integration tests
//!
//! The bridge is exercised against [`MockPlc`] and a [`RecordingBus`] that
//! stands in for an MQTT client, so no controller or broker is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use logosrv::core::device::{Device, RegionSpec};
use logosrv::core::mapper::MessageSubscriber;
use logosrv::core::mqtt::{LastWillMessage, MessagePublisher, QualityOfService, Subscription};
use logosrv::core::status::StatusReporter;
use logosrv::core::transport::MockPlc;

/// One message seen by [`RecordingBus`]
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QualityOfService,
    pub retain: bool,
}

/// In-memory MQTT client: records publishes, delivers injected messages
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<HashMap<String, Arc<Subscription>>>,
    last_will: Mutex<Option<LastWillMessage>>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn last_will(&self) -> Option<LastWillMessage> {
        self.last_will.lock().clone()
    }

    pub fn subscription(&self, topic: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().get(topic).cloned()
    }

    /// Deliver `payload` to the handlers of `topic`, as the broker would
    pub async fn inject(&self, topic: &str, payload: &str) {
        let subscription = self.subscription(topic);
        if let Some(subscription) = subscription {
            subscription.deliver(Bytes::from(payload.to_string())).await;
        }
    }
}

#[async_trait]
impl MessagePublisher for RecordingBus {
    fn client_id(&self) -> &str {
        "recording-bus"
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QualityOfService, retain: bool) {
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            qos,
            retain,
        });
    }

    fn set_last_will(&self, will: LastWillMessage) {
        *self.last_will.lock() = Some(will);
    }
}

impl MessageSubscriber for RecordingBus {
    fn subscribe(&self, topic: &str, qos: QualityOfService) -> Arc<Subscription> {
        self.subscriptions
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Subscription::new(topic, qos)))
            .clone()
    }
}

/// Fast polling interval for tests
pub const POLL: Duration = Duration::from_millis(20);

pub fn device(plc: &MockPlc, ranges: &[(usize, usize)], status: Option<Arc<StatusReporter>>) -> Device {
    let specs: Vec<_> = ranges
        .iter()
        .map(|&(start, end)| RegionSpec::new(start, end, POLL))
        .collect();
    Device::new("test-logo", Box::new(plc.transport()), &specs, status)
        .unwrap_or_else(|e| panic!("device: {}", e))
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let a few poll cycles pass
pub async fn settle() {
    tokio::time::sleep(POLL * 5).await;
}
