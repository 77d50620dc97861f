use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::DevError;
use crate::error::Result;

const CONFIG_FILE_NAME: &str = "config.json";
const SESSIONS_SUBDIR: &str = "sessions";

fn default_max_context_tokens() -> u32 {
    131_072
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_retries_automated() -> u32 {
    10
}

fn default_max_loops() -> u32 {
    1_000
}

fn default_session_retention_days() -> u64 {
    30
}

/// Application configuration, loaded once per invocation and merged with
/// defaults for any field missing from the on-disk file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,

    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_retries_automated")]
    pub max_retries_automated: u32,

    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_context_tokens: default_max_context_tokens(),
            command_timeout: default_command_timeout(),
            max_retries: default_max_retries(),
            max_retries_automated: default_max_retries_automated(),
            max_loops: default_max_loops(),
            session_retention_days: default_session_retention_days(),
        }
    }
}

impl Config {
    pub fn max_retries_for(&self, automated: bool) -> u32 {
        if automated {
            self.max_retries_automated
        } else {
            self.max_retries
        }
    }
}

/// The per-OS root directory for config and sessions: `%APPDATA%\dev-agent`
/// on Windows, `~/Library/Application Support/dev-agent` on macOS, and
/// `~/.dev-agent` on Linux (a flat dotdir rather than the XDG
/// `~/.config/dev-agent`).
pub fn config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = dirs::home_dir()
            .ok_or_else(|| DevError::Config("could not determine home directory".into()))?;
        Ok(home.join(".dev-agent"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let base = dirs::config_dir()
            .ok_or_else(|| DevError::Config("could not determine config directory".into()))?;
        Ok(base.join("dev-agent"))
    }
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn sessions_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join(SESSIONS_SUBDIR))
}

/// Load the config file, filling in defaults for any missing field. Returns
/// `Ok(None)` when no config file exists yet (the caller should run the
/// setup wizard in that case).
pub fn load_config() -> Result<Option<Config>> {
    load_config_from(&config_file_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&raw)
        .map_err(|e| DevError::Config(format!("malformed config at {}: {e}", path.display())))?;
    Ok(Some(config))
}

pub fn save_config(config: &Config) -> Result<()> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)?;
    save_config_to(&dir.join(CONFIG_FILE_NAME), config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"apiUrl": "http://x", "model": "gpt"}"#).expect("write");
        let config = load_config_from(&path).expect("load").expect("present");
        assert_eq!(config.api_url, "http://x");
        assert_eq!(config.model, "gpt");
        assert_eq!(config.max_context_tokens, default_max_context_tokens());
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope.json");
        assert!(load_config_from(&path).expect("load").is_none());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = Config {
            api_url: "http://localhost:1234".into(),
            api_key: "secret".into(),
            model: "my-model".into(),
            ..Default::default()
        };
        save_config_to(&path, &config).expect("save");
        let loaded = load_config_from(&path).expect("load").expect("present");
        assert_eq!(loaded, config);
    }
}
