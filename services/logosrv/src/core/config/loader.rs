//! Configuration loading
//!
//! The file format follows the extension (`yaml`/`yml`, `toml`, `json`).
//! Environment variables prefixed with `LOGOSRV_` override file values, with
//! `__` separating nested keys: `LOGOSRV_MQTT_BROKER__PORT=1884`.

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;
use tracing::{debug, info};

use super::types::LogoSrvConfig;
use super::validation::validate;
use super::ENV_PREFIX;
use crate::error::{LogoSrvError, Result};

/// Copy `defaults` to `config_path` when the latter does not exist.
///
/// Returns true when a copy was made.
pub fn ensure_default_config(config_path: &Path, defaults: Option<&Path>) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }
    let Some(defaults) = defaults.filter(|p| p.exists()) else {
        return Ok(false);
    };

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(defaults, config_path)?;
    info!(
        "Created {} from {}",
        config_path.display(),
        defaults.display()
    );
    Ok(true)
}

/// Load `path` with `LOGOSRV_` environment overrides
pub fn load_config(path: &Path) -> Result<LogoSrvConfig> {
    load_config_with_prefix(path, ENV_PREFIX)
}

/// Load `path` with overrides from variables starting with `prefix`
pub fn load_config_with_prefix(path: &Path, prefix: &str) -> Result<LogoSrvConfig> {
    if !path.exists() {
        return Err(LogoSrvError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let figment = match extension.as_str() {
        "json" => Figment::new().merge(Json::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        other => {
            return Err(LogoSrvError::config(format!(
                "Unsupported config format: '{}'",
                other
            )))
        },
    };

    let config: LogoSrvConfig = figment
        .merge(Env::prefixed(prefix).split("__"))
        .extract()
        .map_err(|e| LogoSrvError::config(format!("Failed to parse config: {}", e)))?;

    debug!(
        path = %path.display(),
        logos = config.logos.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Load and validate in one step
pub fn load_and_validate(path: &Path) -> Result<LogoSrvConfig> {
    let config = load_config(path)?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_default_config() {
        let dir = TempDir::new().unwrap();
        let defaults = dir.path().join("defaults.yaml");
        let target = dir.path().join("conf").join("logosrv.yaml");
        std::fs::write(&defaults, "logos: []\n").unwrap();

        assert!(ensure_default_config(&target, Some(&defaults)).unwrap());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "logos: []\n");
        assert!(!ensure_default_config(&target, Some(&defaults)).unwrap());

        let missing = dir.path().join("other.yaml");
        assert!(!ensure_default_config(&missing, None).unwrap());
        assert!(!missing.exists());
    }

    #[test]
    fn test_formats_by_extension() {
        let dir = TempDir::new().unwrap();

        let json = dir.path().join("c.json");
        std::fs::write(&json, r#"{"mqtt_broker": {"host": "broker", "port": 1884}}"#).unwrap();
        let config = load_config_with_prefix(&json, "LOGOSRV_TEST_JSON_").unwrap();
        assert_eq!(config.mqtt_broker.host, "broker");
        assert_eq!(config.mqtt_broker.port, 1884);

        let toml = dir.path().join("c.toml");
        std::fs::write(&toml, "[mqtt_broker]\nhost = \"toml-broker\"\n").unwrap();
        let config = load_config_with_prefix(&toml, "LOGOSRV_TEST_TOML_").unwrap();
        assert_eq!(config.mqtt_broker.host, "toml-broker");
        assert_eq!(config.mqtt_broker.port, 1883);

        let ini = dir.path().join("c.ini");
        std::fs::write(&ini, "").unwrap();
        assert!(load_config_with_prefix(&ini, "LOGOSRV_TEST_INI_").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/logosrv.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
