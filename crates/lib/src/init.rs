//! Initialize the configuration directory: create `~/.chatverse` and a
//! default config file with every key spelled out for editing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the config directory and default config file if they do not exist.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn init_writes_a_loadable_default_config() {
        let dir =
            std::env::temp_dir().join(format!("chatverse-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        init_config_dir(&config_path).unwrap();
        assert!(config_path.exists());
        let (config, used) = load_config(Some(config_path.clone())).unwrap();
        assert_eq!(used, config_path);
        assert_eq!(config.backend.poll_interval_ms, 2000);
        // Idempotent: a second init leaves the file alone.
        init_config_dir(&config_path).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
