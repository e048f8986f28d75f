use crate::models::SortBy;
use crate::{error::Result, MarginError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default = "default_min_selection_chars")]
    pub min_selection_chars: usize,
    #[serde(default = "default_max_selection_chars")]
    pub max_selection_chars: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default)]
    pub default_sort: SortBy,
    #[serde(default = "default_quote_preview_chars")]
    pub quote_preview_chars: usize,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_site_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_min_selection_chars() -> usize {
    5
}

fn default_max_selection_chars() -> usize {
    500
}

fn default_max_content_chars() -> usize {
    1000
}

fn default_quote_preview_chars() -> usize {
    150
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: default_api_base_url(),
            site_base_url: default_site_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            admin_emails: Vec::new(),
            min_selection_chars: default_min_selection_chars(),
            max_selection_chars: default_max_selection_chars(),
            max_content_chars: default_max_content_chars(),
            default_sort: SortBy::default(),
            quote_preview_chars: default_quote_preview_chars(),
        }
    }
}

/// Directory holding the config file and the persisted anonymous identity.
pub fn get_config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir()
        .ok_or_else(|| MarginError::Internal("Failed to get config directory".to_string()))?;

    path.push("margin");
    fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let default_config = Config::default();
        save_config_to(path, &default_config)?;
        return Ok(default_config);
    }

    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| MarginError::Internal(format!("Failed to parse config: {}", e)))?;
    let mut config: Config = serde_json::from_value(value.clone())
        .map_err(|e| MarginError::Internal(format!("Failed to parse config: {}", e)))?;

    let mut changed = false;
    if config.min_selection_chars == 0 {
        config.min_selection_chars = default_min_selection_chars();
        changed = true;
    }
    if config.max_selection_chars < config.min_selection_chars {
        config.max_selection_chars = default_max_selection_chars().max(config.min_selection_chars);
        changed = true;
    }
    let trimmed_base = config.api_base_url.trim_end_matches('/').to_string();
    if trimmed_base != config.api_base_url {
        config.api_base_url = trimmed_base;
        changed = true;
    }

    // Older files may predate some fields; write them back filled in.
    let needs_backfill = value
        .as_object()
        .map(|obj| !obj.contains_key("admin_emails") || !obj.contains_key("default_sort"))
        .unwrap_or(false);
    if needs_backfill || changed {
        save_config_to(path, &config)?;
    }

    Ok(config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| MarginError::Internal(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, content)?;
    Ok(())
}
