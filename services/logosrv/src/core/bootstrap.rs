//! Service bootstrap: command line, logging and configuration checks
//!
//! Uses the shared bootstrap helpers from `common`.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::core::config::{self, LogoSrvConfig};
use crate::error::{LogoSrvError, Result};
use common::service_bootstrap::ServiceInfo;
use errors::BridgeError;

pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for logosrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "logosrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Siemens LOGO! to MQTT bridge",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, env = "LOGOSRV_CONFIG", default_value = "config/logosrv.yaml")]
    pub config: PathBuf,

    /// Defaults copied to the configuration path when it does not exist
    #[arg(long, default_value = "config/logosrv.defaults.yaml")]
    pub defaults: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Log directory
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            log_level: args.log_level,
            config_path: args.config,
            defaults_path: Some(args.defaults),
            log_dir: args.log_dir,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo::new(
        "logosrv",
        env!("CARGO_PKG_VERSION"),
        "Siemens LOGO! variable memory to MQTT bridge",
    )
}

/// Load `.env` (debug builds), then set up console and file logging
pub fn initialize_logging(args: &ServiceArgs, service: &ServiceInfo) -> Result<()> {
    common::service_bootstrap::load_development_env();
    common::service_bootstrap::init_logging(service, args)
        .map_err(|e| LogoSrvError::config(format!("Failed to init logging: {}", e)))
}

/// Create the configuration from defaults if needed, then load and validate it
pub fn load_configuration(args: &ServiceArgs) -> Result<LogoSrvConfig> {
    config::ensure_default_config(&args.config_path, args.defaults_path.as_deref())?;
    info!("Reading configuration from {}", args.config_path.display());
    config::load_and_validate(&args.config_path)
}

/// Log a startup failure at the level its category calls for
pub fn report_error(context: &str, err: &BridgeError) {
    if err.log_level() == tracing::Level::ERROR {
        error!(code = err.error_code(), "{}: {}", context, err);
    } else {
        warn!(code = err.error_code(), "{}: {}", context, err);
    }
}

/// Log what a validated configuration would start
pub fn log_summary(config: &LogoSrvConfig) {
    info!(
        "MQTT broker at {}:{}{}",
        config.mqtt_broker.host,
        config.mqtt_broker.port,
        match &config.mqtt_broker.username {
            Some(user) => format!(" user {}", user),
            None => String::new(),
        }
    );
    for logo in &config.logos {
        info!(
            "LOGO! at {}:{} with {} memory range(s)",
            logo.ip_address,
            logo.port,
            logo.memory_ranges.len()
        );
        for client in &logo.mqtt {
            info!(
                "- MQTT client {} ({} channel(s), status {})",
                client.client_id,
                client.channels.len(),
                client
                    .status
                    .as_ref()
                    .map(|s| s.topic.as_str())
                    .unwrap_or("off")
            );
            for channel in &client.channels {
                info!(
                    "-- {:?} {} QoS:{}/{} retain:{} logo:{}@{}",
                    channel.action,
                    channel.topic,
                    channel.qos.level(),
                    channel.qos,
                    channel.retain,
                    channel.value_type,
                    channel.logo_address,
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_args_into_service_args() {
        let args = Args::parse_from([
            "logosrv",
            "-c",
            "/etc/logosrv.toml",
            "--log-level",
            "debug",
            "--validate",
        ]);
        let service: ServiceArgs = args.into();
        assert_eq!(service.config_path, PathBuf::from("/etc/logosrv.toml"));
        assert_eq!(
            service.defaults_path,
            Some(PathBuf::from("config/logosrv.defaults.yaml"))
        );
        assert_eq!(service.parse_log_level(), tracing::Level::DEBUG);
        assert!(service.validate);
        assert!(!service.no_color);
    }

    #[test]
    fn test_load_configuration_from_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let defaults = dir.path().join("defaults.yaml");
        std::fs::write(
            &defaults,
            "logos:\n  - ip_address: 10.0.0.5\n    mqtt:\n      - client_id: a\n",
        )
        .unwrap();

        let args = ServiceArgs {
            config_path: dir.path().join("logosrv.yaml"),
            defaults_path: Some(defaults),
            ..ServiceArgs::default()
        };
        let config = load_configuration(&args).unwrap();
        assert_eq!(config.logos[0].ip_address, "10.0.0.5");
        assert!(args.config_path.exists());
    }

    #[test]
    #[traced_test]
    fn test_report_error_uses_category() {
        let err: BridgeError = LogoSrvError::config("logos[0].port must not be 0").into();
        report_error("Invalid configuration", &err);
        assert!(logs_contain("ERROR"));
        assert!(logs_contain("CONFIGURATION_ERROR"));
        assert!(logs_contain("logos[0].port must not be 0"));

        let err: BridgeError = LogoSrvError::connection("broker gone").into();
        report_error("Startup", &err);
        assert!(logs_contain("COMMUNICATION_ERROR"));
    }
}
