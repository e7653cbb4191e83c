//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatverse/config.json`) and
//! environment. Everything server-side belongs to the external provider; the
//! config only carries how to reach it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// External auth/document backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Profile defaults applied at signup.
    #[serde(default)]
    pub profile: ProfileConfig,
}

/// How to reach the external backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend project identifier. Empty means no project is configured and
    /// the frontends fall back to the in-memory demo backend.
    #[serde(default)]
    pub project_id: String,

    /// API key for the auth endpoints. Overridden by CHATVERSE_API_KEY env.
    pub api_key: Option<String>,

    /// When set (host:port), requests go to a local emulator instead of the
    /// hosted endpoints.
    pub emulator_host: Option<String>,

    /// Interval between live-query polls, in milliseconds (default 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_key: None,
            emulator_host: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Profile defaults (status line shown in the members roster).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    /// Status written to the user's roster document at signup.
    pub status: Option<String>,
}

/// Resolve the backend API key: env CHATVERSE_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    std::env::var("CHATVERSE_API_KEY")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .backend
                .api_key
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// True when a real backend project is configured.
pub fn has_backend_project(config: &Config) -> bool {
    !config.backend.project_id.trim().is_empty()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATVERSE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatverse").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or CHATVERSE_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
