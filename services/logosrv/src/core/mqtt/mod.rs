//! MQTT side of the bridge

pub mod channel;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use channel::{ChannelOptions, ChannelState, MessageChannel, MessageHandler, Subscription};

/// MQTT delivery guarantee, named as in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum QualityOfService {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    pub fn level(self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }
}

impl From<QualityOfService> for rumqttc::QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QualityOfService {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QualityOfService::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QualityOfService::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QualityOfService::ExactlyOnce,
        }
    }
}

impl fmt::Display for QualityOfService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Message the broker publishes when a client vanishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWillMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QualityOfService,
    pub retain: bool,
}

/// Outbound side of a message channel
#[async_trait]
pub trait MessagePublisher: Send + Sync + fmt::Debug {
    fn client_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Publish now or drop with a warning; never queues
    async fn publish(&self, topic: &str, payload: Bytes, qos: QualityOfService, retain: bool);

    /// Register the last will used by the next connect
    fn set_last_will(&self, will: LastWillMessage);
}
