#![forbid(unsafe_code)]

//! Runtime configuration for the ytsync binary.
//!
//! Values resolve in a fixed precedence order: explicit overrides (usually
//! CLI flags) win over process environment variables, which win over the
//! `.env` file, which wins over built-in defaults. Everything is resolved
//! once into an immutable [`RuntimeConfig`] before any network activity.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_PATH: &str = "download";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Fully resolved configuration, constructed once and never mutated mid-run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Catalog API key. Optional because `sync-urls` never talks to the
    /// catalog API; commands that do must call [`RuntimeConfig::require_api_key`].
    pub api_key: Option<String>,
    pub download_path: PathBuf,
    pub api_base_url: String,
}

impl RuntimeConfig {
    /// Fails fast when a command needs the catalog API but no key was found.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("API key is required; pass --api-key or set API_KEY"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub api_key: Option<String>,
    pub download_path: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_config(&file_vars, env_var_string, overrides))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let api_key = overrides
        .api_key
        .and_then(non_blank)
        .or_else(|| lookup_value("API_KEY", file_vars, &env_lookup));
    let download_path = overrides
        .download_path
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DOWNLOAD_PATH", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_PATH.to_string());
    let api_base_url = overrides
        .api_base_url
        .and_then(non_blank)
        .or_else(|| lookup_value("API_BASE_URL", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    RuntimeConfig {
        api_key,
        download_path: PathBuf::from(download_path),
        api_base_url,
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Reads a `.env`-style file, tolerating `export` prefixes, single or double
/// quotes, comments, and malformed lines. A missing file is an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
