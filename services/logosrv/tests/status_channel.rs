//! Status side channel fed by a device's lifecycle

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use common::{device, wait_until, RecordingBus};
use logosrv::core::config::{ChannelAction, ChannelConfig, StatusConfig};
use logosrv::core::device::ValueType;
use logosrv::core::mapper;
use logosrv::core::mqtt::QualityOfService;
use logosrv::core::status::StatusReporter;
use logosrv::core::transport::MockPlc;

fn status_config() -> StatusConfig {
    StatusConfig {
        topic: "logo/status".to_string(),
        qos: QualityOfService::ExactlyOnce,
        retain: true,
    }
}

#[tokio::test]
async fn test_connection_lifecycle_is_reported() {
    let plc = MockPlc::new();
    let bus = RecordingBus::new();
    let reporter = StatusReporter::new("logosrv", "2.0.0");
    reporter.add(bus.clone(), &status_config());

    let will = bus.last_will().unwrap();
    assert_eq!(will.topic, "logo/status/Connection");
    assert_eq!(will.payload, "lost");
    assert_eq!(will.qos, QualityOfService::ExactlyOnce);
    assert!(will.retain);

    let device = device(&plc, &[(0, 16)], Some(reporter.clone()));
    assert!(device.connect().await);
    assert!(
        wait_until(Duration::from_secs(2), || {
            bus.payloads_on("logo/status/Connection") == ["connected"]
        })
        .await
    );
    assert_eq!(bus.payloads_on("logo/status/Software"), ["logosrv 2.0.0"]);
    assert_eq!(bus.payloads_on("logo/status/Version"), ["2.0.0"]);
    assert!(bus
        .published()
        .iter()
        .all(|m| m.retain && m.qos == QualityOfService::ExactlyOnce));

    device.dispose().await;
    reporter.close().await;
    assert_eq!(
        bus.payloads_on("logo/status/Connection"),
        ["connected", "disconnected"]
    );
}

#[tokio::test]
async fn test_last_notification_after_delivery() {
    let plc = MockPlc::new();
    let bus = RecordingBus::new();
    let reporter = StatusReporter::new("logosrv", "2.0.0");
    reporter.add(bus.clone(), &status_config());

    let device = device(&plc, &[(0, 16)], Some(reporter.clone()));
    mapper::bind(
        &device,
        &bus,
        &ChannelConfig {
            action: ChannelAction::Publish,
            topic: "logo/get/byte/2".to_string(),
            logo_address: 2,
            value_type: ValueType::Byte,
            qos: QualityOfService::AtMostOnce,
            retain: false,
            duration_ms: 250,
        },
    )
    .unwrap();
    assert!(device.connect().await);
    reporter.flush().await;
    assert!(bus.payloads_on("logo/status/LastNotification").is_empty());

    plc.set_byte(2, 1);
    assert!(
        wait_until(Duration::from_secs(2), || {
            !bus.payloads_on("logo/status/LastNotification").is_empty()
        })
        .await
    );
    let stamp = bus.payloads_on("logo/status/LastNotification")[0].clone();
    assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    assert_eq!(bus.payloads_on("logo/get/byte/2"), ["1"]);

    device.dispose().await;
    reporter.close().await;
}
