// src/config.rs

//! Configuration loading utilities.
//!
//! Secrets are usually kept out of the TOML file and supplied through the
//! environment; `load_config` layers those overrides on top of the file.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::utils::log;

/// Environment variable overriding `backend.crawler_token`.
pub const ENV_CRAWLER_TOKEN: &str = "SITESYNC_CRAWLER_TOKEN";
/// Environment variable overriding `backend.auth_uuid`.
pub const ENV_AUTH_UUID: &str = "SITESYNC_AUTH_UUID";
/// Environment variable overriding `backend.base_url`.
pub const ENV_API_BASE_URL: &str = "SITESYNC_API_BASE_URL";
/// Environment variable overriding `storage.worker_url`.
pub const ENV_WORKER_URL: &str = "SITESYNC_WORKER_URL";

/// Load configuration from a TOML file and apply environment overrides.
///
/// A missing file falls back to defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        log::warn(&format!(
            "Config file {} not found, using defaults",
            path.display()
        ));
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply overrides from a variable lookup. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get(ENV_CRAWLER_TOKEN) {
        config.backend.crawler_token = Some(token);
    }
    if let Some(uuid) = get(ENV_AUTH_UUID) {
        config.backend.auth_uuid = Some(uuid);
    }
    if let Some(base) = get(ENV_API_BASE_URL) {
        config.backend.base_url = base;
    }
    if let Some(worker) = get(ENV_WORKER_URL) {
        config.storage.worker_url = worker;
    }
}
