use std::fs;
use serde::{Deserialize, Serialize};
use super::file_service::get_app_data_dir;

pub const DEFAULT_BASE_URL: &str =
    "https://ai-animator-backend.livelyocean-b0186b38.southindia.azurecontainerapps.io";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub google_client_id: Option<String>,
}

impl Config {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

fn get_config_path() -> Result<std::path::PathBuf, String> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config() -> Result<Config, String> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

pub fn save_config(config: &Config) -> Result<(), String> {
    let config_path = get_config_path()?;
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(())
}

pub fn get_base_url() -> Result<String, String> {
    Ok(load_config()?.effective_base_url())
}

pub fn set_base_url(url: &str) -> Result<(), String> {
    let mut config = load_config().unwrap_or_default();
    config.base_url = Some(url.to_string());
    save_config(&config)
}

pub fn get_google_client_id() -> Result<Option<String>, String> {
    Ok(load_config()?.google_client_id)
}

pub fn set_google_client_id(client_id: &str) -> Result<(), String> {
    let mut config = load_config().unwrap_or_default();
    config.google_client_id = Some(client_id.to_string());
    save_config(&config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_falls_back_to_default_base_url() {
        let config = Config::default();
        assert_eq!(config.effective_base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn explicit_base_url_wins() {
        let config = Config {
            base_url: Some("http://localhost:8080".to_string()),
            google_client_id: None,
        };
        assert_eq!(config.effective_base_url(), "http://localhost:8080");
    }
}
