//! Service bootstrap helpers: metadata, banner, logging and `.env` loading

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::{info, Level};

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "logosrv")
    pub name: String,
    /// Service version, usually `env!("CARGO_PKG_VERSION")` of the binary
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// `"<name> <version>"`, as reported on the status channel
    pub fn software(&self) -> String {
        format!("{} {}", self.name, self.version)
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██╗      ██████╗  ██████╗  ██████╗ ███████╗██████╗ ██╗   ██╗
 ██║     ██╔═══██╗██╔════╝ ██╔═══██╗██╔════╝██╔══██╗██║   ██║
 ██║     ██║   ██║██║  ███╗██║   ██║███████╗██████╔╝██║   ██║
 ██║     ██║   ██║██║   ██║██║   ██║╚════██║██╔══██╗╚██╗ ██╔╝
 ███████╗╚██████╔╝╚██████╔╝╚██████╔╝███████║██║  ██║ ╚████╔╝
 ╚══════╝ ╚═════╝  ╚═════╝  ╚═════╝ ╚══════╝╚═╝  ╚═╝  ╚═══╝
    "#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service from its startup arguments
///
/// Log root directory priority:
/// 1. LOGOSRV_LOG_DIR environment variable
/// 2. `--log-dir` argument
/// 3. Default "logs"
pub fn init_logging(service: &ServiceInfo, args: &ServiceArgs) -> anyhow::Result<()> {
    logging::init_log_root(args.log_dir.as_deref());

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level: args.parse_log_level(),
        file_level: Level::DEBUG,
        enable_json: false,
        enable_file: true,
        ansi: !args.no_color,
        max_log_files: 30,
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}

/// Load `KEY=VALUE` lines from `.env` in debug builds
///
/// Variables already present in the environment are left untouched. Release
/// builds do nothing.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn parse_env_lines(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
}
