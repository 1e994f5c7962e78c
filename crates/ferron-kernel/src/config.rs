//! Configuration loading from `~/.ferron/config.toml` with defaults.

use ferron_types::config::NetronConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load node configuration from a TOML file, with defaults.
///
/// A missing, unreadable, unparsable or invalid file yields
/// `NetronConfig::default()` and a logged warning.
pub fn load_config(path: Option<&Path>) -> NetronConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return NetronConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return NetronConfig::default();
        }
    };

    match toml::from_str::<NetronConfig>(&contents) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Invalid config, using defaults"
                );
                NetronConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            NetronConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    ferron_home().join("config.toml")
}

/// Get the default Ferron home directory.
pub fn ferron_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ferron")
}
