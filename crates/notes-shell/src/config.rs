//! Configuration loading

use anyhow::{Context, Result};
use notes_core::Config;
use std::path::Path;

/// Load `config.json` from `config_dir`.
///
/// When the file is missing, defaults are used and written out for
/// reference.
pub fn load(config_dir: &Path) -> Result<Config> {
    let config_file = config_dir.join("config.json");

    if config_file.exists() {
        let content = std::fs::read_to_string(&config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
        let config: Config =
            serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
        tracing::info!("Loaded configuration from {:?}", config_file);
        Ok(config)
    } else {
        tracing::info!("No config file found at {:?}, using defaults", config_file);
        let config = Config::default();

        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        let content = serde_json::to_string_pretty(&config)?;
        std::fs::write(&config_file, content)
            .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
        tracing::info!("Created default config at {:?}", config_file);

        Ok(config)
    }
}
