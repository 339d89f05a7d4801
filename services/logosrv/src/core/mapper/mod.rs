//! Wiring between MQTT topics and LOGO! variables
//!
//! Each configured channel entry becomes one [`Mapping`]:
//!
//! | action           | direction        | behaviour                                |
//! |------------------|------------------|------------------------------------------|
//! | `Publish`        | LOGO! -> MQTT    | publish the value whenever it changes     |
//! | `Subscribe`      | MQTT -> LOGO!    | write every received value                |
//! | `SubscribePulse` | MQTT -> LOGO!    | write the value, reset to 0 after a delay |
//!
//! Payloads that do not decode are logged and dropped.

pub mod codec;

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::{ChannelAction, ChannelConfig};
use crate::core::device::{AnyVariable, Device, SubscriptionId, Value, ValueType};
use crate::core::mqtt::{MessageChannel, MessagePublisher, QualityOfService, Subscription};
use crate::error::{LogoSrvError, Result};

/// Lifecycle of one mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    Unbound,
    Bound,
    /// Publishing a changed value
    Firing,
    /// Handling an inbound message
    Receiving,
}

#[derive(Debug)]
struct StateCell(Mutex<MappingState>);

impl StateCell {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(MappingState::Bound)))
    }

    fn get(&self) -> MappingState {
        *self.0.lock()
    }

    /// Bound -> `busy`; false when the mapping is unbound
    fn enter(&self, busy: MappingState) -> bool {
        let mut state = self.0.lock();
        if *state == MappingState::Unbound {
            return false;
        }
        *state = busy;
        true
    }

    fn leave(&self) {
        let mut state = self.0.lock();
        if *state != MappingState::Unbound {
            *state = MappingState::Bound;
        }
    }

    fn unbind(&self) {
        *self.0.lock() = MappingState::Unbound;
    }
}

/// Subscription side of a message bus
pub trait MessageSubscriber {
    fn subscribe(&self, topic: &str, qos: QualityOfService) -> Arc<Subscription>;
}

impl MessageSubscriber for MessageChannel {
    fn subscribe(&self, topic: &str, qos: QualityOfService) -> Arc<Subscription> {
        MessageChannel::subscribe(self, topic, qos)
    }
}

/// A live channel entry
pub struct Mapping {
    action: ChannelAction,
    topic: String,
    variable: AnyVariable,
    change_subscription: Option<SubscriptionId>,
    state: Arc<StateCell>,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("action", &self.action)
            .field("topic", &self.topic)
            .field("address", &self.variable.address())
            .field("state", &self.state())
            .finish()
    }
}

impl Mapping {
    pub fn action(&self) -> ChannelAction {
        self.action
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> MappingState {
        self.state.get()
    }

    /// Stop reacting to changes and messages
    pub fn unbind(&self) {
        self.state.unbind();
        if let Some(id) = self.change_subscription {
            self.variable.unsubscribe(id);
        }
        debug!(topic = %self.topic, "Mapping unbound");
    }
}

/// Realize one channel entry on `device`.
///
/// Configuration errors, such as a pulse on a non-byte channel or an address
/// outside every memory range, are returned immediately.
pub fn bind<B>(device: &Device, bus: &Arc<B>, config: &ChannelConfig) -> Result<Mapping>
where
    B: MessagePublisher + MessageSubscriber + 'static,
{
    let variable = device
        .variable(config.logo_address, config.value_type)
        .map_err(|e| {
            LogoSrvError::config(format!("Channel '{}': {}", config.topic, e))
        })?;
    let state = StateCell::new();

    let change_subscription = match config.action {
        ChannelAction::Publish => {
            let publisher: Arc<dyn MessagePublisher> = bus.clone();
            Some(publish_on_change_with_state(
                publisher,
                &variable,
                &config.topic,
                config.qos,
                config.retain,
                state.clone(),
            )?)
        },
        ChannelAction::Subscribe => {
            let subscription = bus.subscribe(&config.topic, config.qos);
            write_with_state(&subscription, variable.clone(), state.clone());
            None
        },
        ChannelAction::SubscribePulse => {
            let subscription = bus.subscribe(&config.topic, config.qos);
            pulse_with_state(
                &subscription,
                variable.clone(),
                Duration::from_millis(config.duration_ms),
                state.clone(),
            )?;
            None
        },
    };

    info!(
        device = %device.name(),
        topic = %config.topic,
        address = config.logo_address,
        "Bound {:?} {} channel", config.action, config.value_type
    );
    Ok(Mapping {
        action: config.action,
        topic: config.topic.clone(),
        variable,
        change_subscription,
        state,
    })
}

/// Write every decodable message of `subscription` to `variable`
pub fn write_logo_variable(subscription: &Subscription, variable: AnyVariable) {
    write_with_state(subscription, variable, StateCell::new());
}

fn write_with_state(subscription: &Subscription, variable: AnyVariable, state: Arc<StateCell>) {
    let topic = subscription.topic().to_string();
    subscription.on_message(move |payload: Bytes| {
        let variable = variable.clone();
        let topic = topic.clone();
        let state = state.clone();
        async move {
            if !state.enter(MappingState::Receiving) {
                return;
            }
            if let Some(value) = decode_or_log(&topic, variable.value_type(), &payload) {
                write_value(&topic, &variable, value).await;
            }
            state.leave();
        }
    });
}

/// Publish `variable` on `topic` after every change
pub fn publish_on_change(
    publisher: Arc<dyn MessagePublisher>,
    variable: &AnyVariable,
    topic: &str,
    qos: QualityOfService,
    retain: bool,
) -> Result<SubscriptionId> {
    publish_on_change_with_state(publisher, variable, topic, qos, retain, StateCell::new())
}

fn publish_on_change_with_state(
    publisher: Arc<dyn MessagePublisher>,
    variable: &AnyVariable,
    topic: &str,
    qos: QualityOfService,
    retain: bool,
    state: Arc<StateCell>,
) -> Result<SubscriptionId> {
    let topic = topic.to_string();
    variable.subscribe_to_change_notification(move |_variable: AnyVariable, value: Value| {
        let publisher = publisher.clone();
        let topic = topic.clone();
        let state = state.clone();
        async move {
            if !state.enter(MappingState::Firing) {
                return;
            }
            debug!(topic = %topic, "Publishing {:?}", value);
            publisher
                .publish(&topic, codec::encode_payload(value), qos, retain)
                .await;
            state.leave();
        }
    })
}

/// Write each message's value, then reset the variable to 0 after `duration`
pub fn pulse_logo_variable(
    subscription: &Subscription,
    variable: AnyVariable,
    duration: Duration,
) -> Result<()> {
    pulse_with_state(subscription, variable, duration, StateCell::new())
}

fn pulse_with_state(
    subscription: &Subscription,
    variable: AnyVariable,
    duration: Duration,
    state: Arc<StateCell>,
) -> Result<()> {
    if variable.value_type() != ValueType::Byte {
        return Err(LogoSrvError::config(format!(
            "Pulse on '{}' needs a Byte channel, got {}",
            subscription.topic(),
            variable.value_type()
        )));
    }

    let topic = subscription.topic().to_string();
    subscription.on_message(move |payload: Bytes| {
        let variable = variable.clone();
        let topic = topic.clone();
        let state = state.clone();
        async move {
            if !state.enter(MappingState::Receiving) {
                return;
            }
            if let Some(value) = decode_or_log(&topic, ValueType::Byte, &payload) {
                write_value(&topic, &variable, value).await;
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    write_value(&topic, &variable, Value::zero(ValueType::Byte)).await;
                });
            }
            state.leave();
        }
    });
    Ok(())
}

fn decode_or_log(topic: &str, value_type: ValueType, payload: &[u8]) -> Option<Value> {
    match codec::decode(value_type, payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                topic,
                payload = %String::from_utf8_lossy(payload),
                "Dropping malformed payload: {}", e
            );
            None
        },
    }
}

async fn write_value(topic: &str, variable: &AnyVariable, value: Value) {
    match variable.set(value).await {
        Ok(()) => debug!(topic, address = variable.address(), "Wrote {:?}", value),
        Err(e) => warn!(topic, address = variable.address(), "Write failed: {}", e),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::device::RegionSpec;
    use crate::core::transport::MockPlc;
    use tracing_test::traced_test;

    fn device(plc: &MockPlc) -> Device {
        Device::new(
            "logo",
            Box::new(plc.transport()),
            &[RegionSpec::new(0, 850, Duration::from_secs(60))],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_pulse_requires_byte() {
        let plc = MockPlc::new();
        let device = device(&plc);
        let subscription = Subscription::new("logo/pulse", QualityOfService::AtMostOnce);
        let err = pulse_logo_variable(
            &subscription,
            device.variable(10, ValueType::Integer).unwrap(),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, LogoSrvError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_write_logo_variable() {
        let plc = MockPlc::new();
        let device = device(&plc);
        assert!(device.link().connect().await);

        let subscription = Subscription::new("logo/set/integer/17", QualityOfService::AtMostOnce);
        write_logo_variable(&subscription, device.variable(17, ValueType::Integer).unwrap());

        subscription.deliver(Bytes::from_static(b"1337")).await;
        assert_eq!(plc.get(17, 2), vec![0x05, 0x39]);

        subscription.deliver(Bytes::from_static(b"garbage")).await;
        assert_eq!(plc.writes(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_payload_logged() {
        let plc = MockPlc::new();
        let device = device(&plc);
        assert!(device.link().connect().await);

        let subscription = Subscription::new("logo/set/float/40", QualityOfService::AtMostOnce);
        write_logo_variable(&subscription, device.variable(40, ValueType::Float).unwrap());
        subscription.deliver(Bytes::from_static(b"13,3")).await;

        assert_eq!(plc.writes(), 0);
        assert!(logs_contain("Dropping malformed payload"));
        assert!(logs_contain("logo/set/float/40"));
    }

    #[tokio::test]
    async fn test_unbound_state_ignores_messages() {
        let plc = MockPlc::new();
        let device = device(&plc);
        assert!(device.link().connect().await);

        let state = StateCell::new();
        let subscription = Subscription::new("logo/set/byte/1", QualityOfService::AtMostOnce);
        write_with_state(
            &subscription,
            device.variable(1, ValueType::Byte).unwrap(),
            state.clone(),
        );
        state.unbind();
        subscription.deliver(Bytes::from_static(b"5")).await;
        assert_eq!(plc.writes(), 0);
        assert_eq!(state.get(), MappingState::Unbound);
    }
}
