//! Application context: devices, MQTT clients and their mappings
//!
//! Startup order is build (no I/O), connect devices, connect MQTT clients.
//! Shutdown disposes devices first so their `disconnected` status still
//! reaches the broker, then closes the status reporters and the clients.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::{LogoConfig, LogoSrvConfig};
use crate::core::device::Device;
use crate::core::mapper::{self, Mapping};
use crate::core::mqtt::{ChannelOptions, MessageChannel};
use crate::core::status::{ConnectionStatus, StatusReporter};
use crate::core::transport::{DeviceTransport, S7Config, S7Transport};
use crate::error::Result;
use common::service_bootstrap::ServiceInfo;

/// Production transport for one configured controller
pub fn s7_transport(config: &LogoConfig) -> Result<Box<dyn DeviceTransport>> {
    let s7 = S7Config::new(config.ip_address.clone(), config.port);
    Ok(Box::new(S7Transport::new(s7)?))
}

/// One controller with everything wired to it
#[derive(Debug)]
pub struct LogoBridge {
    device: Device,
    status: Option<Arc<StatusReporter>>,
    clients: Vec<Arc<MessageChannel>>,
    mappings: Vec<Mapping>,
}

impl LogoBridge {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn status(&self) -> Option<&Arc<StatusReporter>> {
        self.status.as_ref()
    }

    pub fn clients(&self) -> &[Arc<MessageChannel>] {
        &self.clients
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

/// Everything the service runs
#[derive(Debug)]
pub struct AppContext {
    bridges: Vec<LogoBridge>,
}

impl AppContext {
    /// Wire `config` using S7 transports
    pub fn build(config: &LogoSrvConfig, service: &ServiceInfo) -> Result<Self> {
        Self::build_with(config, service, s7_transport)
    }

    /// Wire `config` with transports from `make_transport`.
    ///
    /// Performs no I/O. Must run inside a Tokio runtime.
    pub fn build_with<F>(config: &LogoSrvConfig, service: &ServiceInfo, make_transport: F) -> Result<Self>
    where
        F: Fn(&LogoConfig) -> Result<Box<dyn DeviceTransport>>,
    {
        let broker = &config.mqtt_broker;
        let mut bridges = Vec::with_capacity(config.logos.len());

        for logo in &config.logos {
            info!("LOGO! at {}", logo.ip_address);
            let status = logo
                .mqtt
                .iter()
                .any(|c| c.status.is_some())
                .then(|| StatusReporter::new(service.name.clone(), service.version.clone()));

            let device = Device::new(
                logo.ip_address.clone(),
                make_transport(logo)?,
                &logo.region_specs(),
                status.clone(),
            )?;

            let mut clients = Vec::with_capacity(logo.mqtt.len());
            let mut mappings = Vec::new();
            for client_config in &logo.mqtt {
                let options = ChannelOptions::new(
                    client_config.client_id.clone(),
                    broker.host.clone(),
                    broker.port,
                )
                .with_credentials(broker.username.as_deref(), broker.password.as_deref())
                .with_clean_session(client_config.clean_session);
                let client = Arc::new(MessageChannel::new(options));

                if let (Some(reporter), Some(status_config)) = (&status, &client_config.status) {
                    reporter.add(client.clone(), status_config);
                }
                for channel in &client_config.channels {
                    mappings.push(mapper::bind(&device, &client, channel)?);
                }
                clients.push(client);
            }

            bridges.push(LogoBridge {
                device,
                status,
                clients,
                mappings,
            });
        }

        Ok(Self { bridges })
    }

    pub fn bridges(&self) -> &[LogoBridge] {
        &self.bridges
    }

    /// Connect every device, then every MQTT client.
    ///
    /// Failures are logged; the poll loops and the MQTT reconnect policy
    /// keep trying in the background.
    pub async fn connect(&self) {
        for bridge in &self.bridges {
            let device = &bridge.device;
            info!(device = %device.name(), "Connecting to LOGO!");
            if !device.connect().await {
                warn!(device = %device.name(), "LOGO! not reachable yet, polling keeps retrying");
                device.enable_polling(true);
            }
        }

        for bridge in &self.bridges {
            for client in &bridge.clients {
                let client_id = &client.options().client_id;
                info!(client_id = %client_id, "Connecting to MQTT broker");
                if let Err(e) = client.connect().await {
                    warn!(client_id = %client_id, "MQTT connect failed, retrying in background: {}", e);
                }
            }
        }

        for bridge in &self.bridges {
            if let Some(status) = &bridge.status {
                status.announce(if bridge.device.is_connected() {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Disconnected
                });
            }
        }
    }

    /// Unbind, dispose devices, flush status, dispose MQTT clients
    pub async fn dispose(&self) {
        info!("Disposing...");
        for bridge in &self.bridges {
            for mapping in &bridge.mappings {
                mapping.unbind();
            }
            bridge.device.dispose().await;
        }
        for bridge in &self.bridges {
            if let Some(status) = &bridge.status {
                status.close().await;
            }
        }
        for bridge in &self.bridges {
            for client in &bridge.clients {
                client.dispose().await;
            }
        }
        info!("Disposed");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::mapper::MappingState;
    use crate::core::mqtt::ChannelState;
    use crate::core::transport::MockPlc;

    const CONFIG: &str = r#"
mqtt_broker:
  host: 127.0.0.1
  port: 1
logos:
  - ip_address: 10.0.0.1
    memory_ranges:
      - start: 0
        end: 64
    mqtt:
      - client_id: logo-1
        status:
          topic: logo/status
        channels:
          - action: Publish
            topic: logo/get/byte/1
            logo_address: 1
          - action: Subscribe
            topic: logo/set/integer/2
            logo_address: 2
            type: Integer
      - client_id: logo-1-pulse
        channels:
          - action: SubscribePulse
            topic: logo/pulse/byte/8
            logo_address: 8
"#;

    fn service() -> ServiceInfo {
        ServiceInfo::new("logosrv", "0.0.1", "test")
    }

    #[tokio::test]
    async fn test_build_wires_everything() {
        let config: LogoSrvConfig = serde_yaml::from_str(CONFIG).unwrap();
        let plc = MockPlc::new();
        let context = AppContext::build_with(&config, &service(), |_| {
            Ok(Box::new(plc.transport()))
        })
        .unwrap();

        let bridge = &context.bridges()[0];
        assert_eq!(bridge.device().name(), "10.0.0.1");
        assert_eq!(bridge.clients().len(), 2);
        assert_eq!(bridge.mappings().len(), 3);
        assert_eq!(bridge.status().unwrap().target_count(), 1);
        assert!(bridge.clients()[0].last_will().is_some());
        assert!(bridge.clients()[1].last_will().is_none());
        assert_eq!(plc.connects(), 0);

        context.dispose().await;
        assert!(bridge
            .mappings()
            .iter()
            .all(|m| m.state() == MappingState::Unbound));
        assert!(bridge
            .clients()
            .iter()
            .all(|c| c.state() == ChannelState::Disposed));
    }

    #[tokio::test]
    async fn test_bad_channel_fails_build() {
        let mut config: LogoSrvConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.logos[0].mqtt[0].channels[0].logo_address = 500;
        let plc = MockPlc::new();
        let err = AppContext::build_with(&config, &service(), |_| Ok(Box::new(plc.transport())))
            .unwrap_err();
        assert!(err.to_string().contains("logo/get/byte/1"));
    }
}
