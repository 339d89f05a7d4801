//! Loading configuration files with environment overrides

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::path::PathBuf;
use tempfile::TempDir;

use logosrv::core::config::{
    ensure_default_config, load_and_validate, load_config_with_prefix, validate, ChannelAction,
};
use logosrv::core::device::ValueType;
use logosrv::core::mqtt::QualityOfService;

const CONFIG: &str = r#"
mqtt_broker:
  host: broker.local
  username: logo
  password: secret
logos:
  - ip_address: 192.168.0.10
    memory_ranges:
      - start: 0
        end: 100
        polling_cycle_ms: 250
    mqtt:
      - client_id: logo-1
        status:
          topic: logo/status
        channels:
          - action: Subscribe
            topic: logo/set/float/20
            logo_address: 20
            type: Float
            qos: ExactlyOnce
"#;

#[test]
fn test_env_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logosrv.yaml");
    std::fs::write(&path, CONFIG).unwrap();

    std::env::set_var("LOGOSRV_IT_ENV_MQTT_BROKER__PORT", "1999");
    std::env::set_var("LOGOSRV_IT_ENV_MQTT_BROKER__HOST", "override.local");
    let config = load_config_with_prefix(&path, "LOGOSRV_IT_ENV_").unwrap();
    std::env::remove_var("LOGOSRV_IT_ENV_MQTT_BROKER__PORT");
    std::env::remove_var("LOGOSRV_IT_ENV_MQTT_BROKER__HOST");

    assert_eq!(config.mqtt_broker.host, "override.local");
    assert_eq!(config.mqtt_broker.port, 1999);
    assert_eq!(config.mqtt_broker.username.as_deref(), Some("logo"));

    let logo = &config.logos[0];
    assert_eq!(logo.port, 102);
    assert_eq!(logo.memory_ranges[0].polling_cycle_ms, 250);
    let channel = &logo.mqtt[0].channels[0];
    assert_eq!(channel.action, ChannelAction::Subscribe);
    assert_eq!(channel.value_type, ValueType::Float);
    assert_eq!(channel.qos, QualityOfService::ExactlyOnce);
    validate(&config).unwrap();
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logosrv.yaml");
    std::fs::write(&path, CONFIG.replace("logo_address: 20", "logo_address: 98")).unwrap();

    let err = load_and_validate(&path).unwrap_err().to_string();
    assert!(err.contains("not inside one memory range"), "{}", err);

    std::fs::write(&path, "logos: [ {").unwrap();
    assert!(load_and_validate(&path).is_err());
}

#[test]
fn test_shipped_defaults_are_valid() {
    let defaults = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/logosrv.defaults.yaml");
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("config").join("logosrv.yaml");

    assert!(ensure_default_config(&target, Some(&defaults)).unwrap());
    let config = load_and_validate(&target).unwrap();
    assert_eq!(config.logos.len(), 1);
    assert_eq!(config.logos[0].mqtt[0].channels.len(), 5);
}
