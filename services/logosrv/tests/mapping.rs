//! Topic to variable mappings driven through a recording MQTT bus

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use common::{device, settle, wait_until, RecordingBus};
use logosrv::core::config::{ChannelAction, ChannelConfig};
use logosrv::core::device::ValueType;
use logosrv::core::mapper::{self, MappingState};
use logosrv::core::mqtt::QualityOfService;
use logosrv::core::transport::MockPlc;
use logosrv::LogoSrvError;

fn channel(action: ChannelAction, topic: &str, address: i32, value_type: ValueType) -> ChannelConfig {
    ChannelConfig {
        action,
        topic: topic.to_string(),
        logo_address: address,
        value_type,
        qos: QualityOfService::AtLeastOnce,
        retain: true,
        duration_ms: 100,
    }
}

#[tokio::test]
async fn test_publish_on_change() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 64)], None);
    let bus = RecordingBus::new();
    let topic = "logo/get/integer/17";
    let mapping = mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Publish, topic, 17, ValueType::Integer),
    )
    .unwrap();
    assert_eq!(mapping.state(), MappingState::Bound);
    assert!(device.connect().await);

    plc.set_bytes(17, &[0x05, 0x39]);
    assert!(wait_until(Duration::from_secs(2), || bus.payloads_on(topic) == ["1337"]).await);

    plc.set_bytes(17, &[0xFF, 0xFF]);
    assert!(wait_until(Duration::from_secs(2), || bus.payloads_on(topic).len() == 2).await);
    assert_eq!(bus.payloads_on(topic)[1], "-1");

    let message = &bus.published()[0];
    assert_eq!(message.qos, QualityOfService::AtLeastOnce);
    assert!(message.retain);

    mapping.unbind();
    plc.set_bytes(17, &[0x00, 0x01]);
    settle().await;
    assert_eq!(bus.payloads_on(topic).len(), 2);
    assert_eq!(mapping.state(), MappingState::Unbound);

    device.dispose().await;
}

#[tokio::test]
async fn test_publish_float() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 64)], None);
    let bus = RecordingBus::new();
    let topic = "logo/get/float/40";
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Publish, topic, 40, ValueType::Float),
    )
    .unwrap();
    assert!(device.connect().await);

    plc.set_bytes(40, &13.3f32.to_be_bytes());
    assert!(wait_until(Duration::from_secs(2), || bus.payloads_on(topic) == ["13.3"]).await);

    device.dispose().await;
}

#[tokio::test]
async fn test_inbound_write() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 64), (200, 256)], None);
    let bus = RecordingBus::new();
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Subscribe, "logo/set/integer/17", 17, ValueType::Integer),
    )
    .unwrap();
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Subscribe, "logo/set/float/20", 20, ValueType::Float),
    )
    .unwrap();
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Subscribe, "logo/set/byte/205", 205, ValueType::Byte),
    )
    .unwrap();
    assert!(device.connect().await);

    bus.inject("logo/set/integer/17", "1337").await;
    bus.inject("logo/set/float/20", "13.3").await;
    bus.inject("logo/set/byte/205", "222").await;

    assert_eq!(plc.get(17, 2), vec![0x05, 0x39]);
    assert_eq!(plc.get(20, 4), 13.3f32.to_be_bytes().to_vec());
    assert_eq!(plc.get(205, 1), vec![222]);
    assert_eq!(plc.writes(), 3);

    // The written value shows up in the cache after the next poll
    let variable = device.integer_at(17).unwrap();
    assert!(wait_until(Duration::from_secs(2), || variable.get().unwrap() == 1337).await);

    device.dispose().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 64)], None);
    let bus = RecordingBus::new();
    let topic = "logo/set/byte/1";
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Subscribe, topic, 1, ValueType::Byte),
    )
    .unwrap();
    assert!(device.connect().await);

    for payload in ["not-a-number", "256", "-1", "", "1.5"] {
        bus.inject(topic, payload).await;
    }
    assert_eq!(plc.writes(), 0);

    // The mapping keeps working afterwards
    bus.inject(topic, "17").await;
    assert_eq!(plc.get(1, 1), vec![17]);

    device.dispose().await;
}

#[tokio::test]
async fn test_pulse_resets_to_zero() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 64)], None);
    let bus = RecordingBus::new();
    let topic = "logo/pulse/byte/3";
    mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::SubscribePulse, topic, 3, ValueType::Byte),
    )
    .unwrap();
    assert!(device.connect().await);

    bus.inject(topic, "1").await;
    assert_eq!(plc.get(3, 1), vec![1]);

    assert!(wait_until(Duration::from_secs(2), || plc.get(3, 1) == [0]).await);
    assert_eq!(plc.write_log(), vec![(3, vec![1]), (3, vec![0])]);

    device.dispose().await;
}

#[tokio::test]
async fn test_bind_rejects_bad_channels() {
    let plc = MockPlc::new();
    let device = device(&plc, &[(0, 16)], None);
    let bus = RecordingBus::new();

    let err = mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::SubscribePulse, "logo/pulse/integer/2", 2, ValueType::Integer),
    )
    .unwrap_err();
    assert!(matches!(err, LogoSrvError::ConfigError(_)));

    let err = mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Publish, "logo/get/float/14", 14, ValueType::Float),
    )
    .unwrap_err();
    assert!(matches!(err, LogoSrvError::ConfigError(_)));

    let err = mapper::bind(
        &device,
        &bus,
        &channel(ChannelAction::Subscribe, "logo/set/byte/none", -1, ValueType::Byte),
    )
    .unwrap_err();
    assert!(matches!(err, LogoSrvError::ConfigError(_)));

    device.dispose().await;
}
