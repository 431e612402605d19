//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM provider to use (currently only "cohere")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Cohere API key. Required: the agent refuses to start without it.
    #[serde(default)]
    pub cohere_api_key: String,

    /// Model used for both the search decision and the streamed reply
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for the streamed reply
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sampling temperature for the search-need classification call
    #[serde(default = "default_decision_temperature")]
    pub decision_temperature: f32,

    /// Minimum time between partial message updates while streaming
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum conversation turns kept per session. `None` keeps everything.
    #[serde(default)]
    pub history_limit: Option<usize>,

    /// Gateway sessions without interaction for this long are disposed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Web search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Telegram configuration
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Web search (Tavily) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search API key. Without it every search returns an error payload.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_true")]
    pub include_answer: bool,

    #[serde(default)]
    pub include_raw_content: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub allow_from: Vec<String>,
}

fn default_provider() -> String {
    "cohere".to_string()
}

fn default_model() -> String {
    "command-r-plus".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_decision_temperature() -> f32 {
    0.2
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_depth() -> String {
    "advanced".to_string()
}

fn default_max_results() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_search_endpoint(),
            search_depth: default_search_depth(),
            max_results: default_max_results(),
            include_answer: true,
            include_raw_content: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            cohere_api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            decision_temperature: default_decision_temperature(),
            flush_interval_ms: default_flush_interval_ms(),
            history_limit: None,
            idle_timeout_secs: default_idle_timeout_secs(),
            search: SearchConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl SearchConfig {
    /// The API key, unless missing or blank.
    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    /// Whether a non-blank Cohere API key is set.
    pub fn has_cohere_key(&self) -> bool {
        !self.cohere_api_key.trim().is_empty()
    }

    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe a key from the config file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("COHERE_API_KEY") {
            self.cohere_api_key = key;
        }
        if let Some(key) = get("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(model) = get("QUILL_MODEL") {
            self.model = model;
        }
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.token = token;
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quill")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file (if present) and the environment.
pub fn load() -> Result<Config> {
    let mut config = load_from(&config_path())?;
    config.apply_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Load configuration from `path`. A missing file yields defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", path);
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

/// Save configuration to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Write a default configuration file unless one already exists.
///
/// Returns `true` when a new file was written.
pub fn onboard() -> Result<bool> {
    if config_path().exists() {
        return Ok(false);
    }
    save(&Config::default())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, "command-r-plus");
        assert_eq!(config.flush_interval(), Duration::from_millis(1000));
        assert_eq!(config.search.max_results, 5);
        assert!(config.search.api_key.is_none());
        assert!(config.history_limit.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cohere_api_key": "abc", "search": {"max_results": 3}}"#)
                .unwrap();
        assert_eq!(config.cohere_api_key, "abc");
        assert_eq!(config.search.max_results, 3);
        assert_eq!(config.search.search_depth, "advanced");
        assert!(config.search.include_answer);
        assert_eq!(config.temperature, 0.7);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COHERE_API_KEY", "co-key"),
            ("TAVILY_API_KEY", "tv-key"),
            ("QUILL_MODEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.cohere_api_key, "co-key");
        assert_eq!(config.search.api_key.as_deref(), Some("tv-key"));
        // Blank values are ignored
        assert_eq!(config.model, "command-r-plus");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.cohere_api_key = "saved".to_string();
        config.history_limit = Some(20);
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.cohere_api_key, "saved");
        assert_eq!(loaded.history_limit, Some(20));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.provider, "cohere");
    }

    #[test]
    fn test_blank_keys_count_as_missing() {
        let mut config = Config::default();
        config.cohere_api_key = "   ".to_string();
        config.search.api_key = Some(" ".to_string());
        assert!(!config.has_cohere_key());
        assert_eq!(config.search.key(), None);

        config.cohere_api_key = "co-key".to_string();
        config.search.api_key = Some("tv-key".to_string());
        assert!(config.has_cohere_key());
        assert_eq!(config.search.key(), Some("tv-key"));
    }
}
