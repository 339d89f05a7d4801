//! Command-line arguments shared by the bridge binaries
//!
//! Each binary parses its own clap `Args` and converts them into
//! [`ServiceArgs`] for the shared bootstrap helpers.

use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Configuration file
    pub config_path: PathBuf,
    /// Defaults copied to `config_path` when it does not exist yet
    pub defaults_path: Option<PathBuf>,
    /// Log directory override
    pub log_dir: Option<String>,
    /// Disable colored output
    pub no_color: bool,
    /// Only validate configuration without starting the service
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config_path: PathBuf::from("config/logosrv.yaml"),
            defaults_path: None,
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse the log level string, falling back to INFO
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
