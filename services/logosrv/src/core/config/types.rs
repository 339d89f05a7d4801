//! Configuration file structure

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{DEFAULT_POLLING_CYCLE_MS, MEMORY_MAX, MEMORY_MIN};
use crate::core::device::{RegionSpec, ValueType};
use crate::core::mqtt::QualityOfService;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoSrvConfig {
    #[serde(default)]
    pub mqtt_broker: BrokerConfig,

    #[serde(default)]
    pub logos: Vec<LogoConfig>,
}

/// MQTT broker endpoint shared by all clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Used only together with `password`
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
        }
    }
}

/// One LOGO! controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoConfig {
    pub ip_address: String,

    /// ISO-on-TCP port
    #[serde(default = "default_logo_port")]
    pub port: u16,

    #[serde(default = "default_memory_ranges")]
    pub memory_ranges: Vec<MemoryRangeConfig>,

    #[serde(default)]
    pub mqtt: Vec<MqttClientConfig>,
}

impl LogoConfig {
    pub fn region_specs(&self) -> Vec<RegionSpec> {
        self.memory_ranges.iter().map(|r| r.to_spec()).collect()
    }
}

/// Polled span `[start, end)` of variable memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRangeConfig {
    #[serde(default = "default_range_start")]
    pub start: i32,

    #[serde(default = "default_range_end")]
    pub end: i32,

    #[serde(default = "default_polling_cycle_ms")]
    pub polling_cycle_ms: u64,
}

impl Default for MemoryRangeConfig {
    fn default() -> Self {
        Self {
            start: default_range_start(),
            end: default_range_end(),
            polling_cycle_ms: default_polling_cycle_ms(),
        }
    }
}

impl MemoryRangeConfig {
    pub fn size(&self) -> i32 {
        self.end - self.start
    }

    /// Only meaningful after validation
    pub fn to_spec(&self) -> RegionSpec {
        RegionSpec::new(
            self.start.max(0) as usize,
            self.end.max(0) as usize,
            Duration::from_millis(self.polling_cycle_ms),
        )
    }

    pub fn contains(&self, address: i32, length: i32) -> bool {
        address >= self.start && address + length <= self.end
    }
}

/// One MQTT client of a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttClientConfig {
    pub client_id: String,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    #[serde(default)]
    pub status: Option<StatusConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Status side channel of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    pub topic: String,

    #[serde(default = "default_status_qos")]
    pub qos: QualityOfService,

    #[serde(default = "default_true")]
    pub retain: bool,
}

/// What a channel entry does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelAction {
    Publish,
    Subscribe,
    SubscribePulse,
}

/// One topic bound to one LOGO! address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub action: ChannelAction,

    pub topic: String,

    #[serde(default = "default_logo_address")]
    pub logo_address: i32,

    #[serde(rename = "type", default)]
    pub value_type: ValueType,

    #[serde(default)]
    pub qos: QualityOfService,

    #[serde(default = "default_true")]
    pub retain: bool,

    /// Pulse length for `SubscribePulse`
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_logo_port() -> u16 {
    102
}

fn default_memory_ranges() -> Vec<MemoryRangeConfig> {
    vec![MemoryRangeConfig::default()]
}

fn default_range_start() -> i32 {
    MEMORY_MIN as i32
}

fn default_range_end() -> i32 {
    MEMORY_MAX as i32
}

fn default_polling_cycle_ms() -> u64 {
    DEFAULT_POLLING_CYCLE_MS
}

fn default_status_qos() -> QualityOfService {
    QualityOfService::ExactlyOnce
}

fn default_logo_address() -> i32 {
    -1
}

fn default_duration_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let yaml = r#"
logos:
  - ip_address: 192.168.0.10
    mqtt:
      - client_id: logo-1
        status:
          topic: logo/status
        channels:
          - action: Publish
            topic: logo/get/byte/1
"#;
        let config: LogoSrvConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mqtt_broker.host, "127.0.0.1");
        assert_eq!(config.mqtt_broker.port, 1883);

        let logo = &config.logos[0];
        assert_eq!(logo.port, 102);
        assert_eq!(logo.memory_ranges, vec![MemoryRangeConfig::default()]);

        let client = &logo.mqtt[0];
        assert!(client.clean_session);
        let status = client.status.as_ref().unwrap();
        assert_eq!(status.qos, QualityOfService::ExactlyOnce);
        assert!(status.retain);

        let channel = &client.channels[0];
        assert_eq!(channel.logo_address, -1);
        assert_eq!(channel.value_type, ValueType::Byte);
        assert_eq!(channel.qos, QualityOfService::AtMostOnce);
        assert!(channel.retain);
        assert_eq!(channel.duration_ms, 250);
    }

    #[test]
    fn test_channel_type_field() {
        let yaml = "action: SubscribePulse\ntopic: a/b\nlogo_address: 3\ntype: Float\nqos: AtLeastOnce\n";
        let channel: ChannelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(channel.action, ChannelAction::SubscribePulse);
        assert_eq!(channel.value_type, ValueType::Float);
        assert_eq!(channel.qos, QualityOfService::AtLeastOnce);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = "action: Toggle\ntopic: a/b\n";
        assert!(serde_yaml::from_str::<ChannelConfig>(yaml).is_err());
    }

    #[test]
    fn test_range_spec() {
        let range = MemoryRangeConfig {
            start: 10,
            end: 20,
            polling_cycle_ms: 250,
        };
        assert_eq!(range.size(), 10);
        assert!(range.contains(18, 2));
        assert!(!range.contains(19, 2));
        let spec = range.to_spec();
        assert_eq!(spec.size(), 10);
        assert_eq!(spec.interval, Duration::from_millis(250));
    }
}
