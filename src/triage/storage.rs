use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::TriageConfig;

const CONFIG_FILE: &str = ".neuroclear.json";
const CURRENT_VERSION: u32 = 1;

/// Environment variables checked for the API key, in priority order
const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// Get the path to the config file
pub fn get_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(CONFIG_FILE)
}

/// Load the config from the default location
pub fn load_config() -> Result<TriageConfig> {
    load_config_from(&get_config_path())
}

/// Load the config from disk, writing defaults if it doesn't exist
pub fn load_config_from(path: &Path) -> Result<TriageConfig> {
    if path.exists() {
        let content = fs::read_to_string(path).context("failed to read config file")?;
        let mut config: TriageConfig =
            serde_json::from_str(&content).context("failed to parse config file")?;

        if config.version < CURRENT_VERSION {
            config = migrate_config(config)?;
            save_config_to(&config, path)?;
        }

        Ok(config)
    } else {
        let config = TriageConfig {
            version: CURRENT_VERSION,
            ..TriageConfig::default()
        };
        save_config_to(&config, path)?;
        log::info!("Wrote default config to {}", path.display());
        Ok(config)
    }
}

/// Save the config to disk
pub fn save_config_to(config: &TriageConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    fs::write(path, &content).context("failed to write config file")?;
    // The file may hold an API key
    fs::set_permissions(path, Permissions::from_mode(0o600))
        .context("failed to set config file permissions")?;
    Ok(())
}

fn migrate_config(mut config: TriageConfig) -> Result<TriageConfig> {
    config.version = CURRENT_VERSION;
    Ok(config)
}

/// Resolve the API key from the environment, then the config file
pub fn resolve_api_key(config: &TriageConfig) -> Option<String> {
    resolve_api_key_with(config, |var| std::env::var(var).ok())
}

fn resolve_api_key_with(
    config: &TriageConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| env(var))
        .chain(config.api_key.clone())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
