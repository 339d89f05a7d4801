//! Configuration model, loading and validation

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{ensure_default_config, load_and_validate, load_config, load_config_with_prefix};
pub use types::{
    BrokerConfig, ChannelAction, ChannelConfig, LogoConfig, LogoSrvConfig, MemoryRangeConfig,
    MqttClientConfig, StatusConfig,
};
pub use validation::{validate, validate_topic};

/// First address of the LOGO! variable memory
pub const MEMORY_MIN: usize = 0;
/// One past the last address of the LOGO! variable memory
pub const MEMORY_MAX: usize = 850;
/// Shortest polling interval accepted
pub const POLLING_CYCLE_MIN_MS: u64 = 100;
pub const DEFAULT_POLLING_CYCLE_MS: u64 = 100;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "LOGOSRV_";
