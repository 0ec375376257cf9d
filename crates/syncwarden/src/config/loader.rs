use std::path::{Path, PathBuf};

use crate::config::schema::ControllerConfig;
use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SYNCWARDEN_CONFIG";

const CONFIG_FILE_NAME: &str = "controller.yaml";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ControllerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ControllerConfig, ConfigError> {
    // An empty document means "all defaults".
    let config: ControllerConfig = if content.trim().is_empty() {
        ControllerConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    config.validate()?;

    Ok(config)
}

/// Platform default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncwarden")
        .join(CONFIG_FILE_NAME)
}

/// Picks the config file: explicit argument, then `SYNCWARDEN_CONFIG`, then the platform default.
pub fn resolve_config_path(cli_arg: Option<&str>) -> PathBuf {
    if let Some(arg) = cli_arg.filter(|a| !a.is_empty()) {
        return PathBuf::from(arg);
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

/// Loads the resolved config file, falling back to defaults when the platform default is absent.
pub fn load_or_default(cli_arg: Option<&str>) -> Result<ControllerConfig, ConfigError> {
    let path = resolve_config_path(cli_arg);
    if !path.exists() && path == default_config_path() {
        log::info!(
            "No config file at {}, using defaults",
            path.to_string_lossy()
        );
        return Ok(ControllerConfig::default());
    }
    log::info!("Loading config from {}", path.to_string_lossy());
    load_config(&path)
}
