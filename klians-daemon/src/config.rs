//! Daemon Configuration
//!
//! TOML configuration of the Klians daemon, stored at
//! `~/.config/klians/daemon.toml` and created with defaults on first run.

use anyhow::{Context, Result};
use klians_core::{ApiConfig, FeedConfig, RealtimeConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "daemon.toml";
const CLIENT_ID_FILE_NAME: &str = "client_id";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server endpoints
    pub server: ServerConfig,

    /// Signed-in account
    #[serde(default)]
    pub account: AccountConfig,

    /// Feed settings
    #[serde(default)]
    pub feed: FeedSettings,

    /// Direct message settings
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Realtime channel settings
    #[serde(default)]
    pub realtime: RealtimeSettings,

    /// Storage paths
    pub paths: PathConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST base URL including the `/api` prefix
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// WebSocket URL of the realtime channel
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Account configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Email of the signed-in user, used to resolve their profile
    #[serde(default)]
    pub email: String,

    /// User id; picks the account among email matches, or stands in when the lookup fails
    #[serde(default)]
    pub user_id: Option<String>,

    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Installation id (auto-generated if not set)
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// How long a broadcast stays pinned, in hours
    #[serde(default = "default_pin_window_hours")]
    pub pin_window_hours: i64,

    /// Keep the offline post cache in the data directory
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Messages kept per open thread
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_realtime_url() -> String {
    "ws://localhost:5000/realtime".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_page_size() -> u32 {
    20
}

fn default_pin_window_hours() -> i64 {
    24
}

fn default_history_limit() -> usize {
    500
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            realtime_url: default_realtime_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            pin_window_hours: default_pin_window_hours(),
            use_cache: true,
        }
    }
}

impl FeedSettings {
    /// Pin window as a duration; zero, negative or overflowing hours fall back to the default
    pub fn pin_window(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.pin_window_hours)
            .filter(|window| *window > chrono::Duration::zero())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "Invalid pin_window_hours {}, using the default",
                    self.pin_window_hours
                );
                klians_core::models::default_pin_window()
            })
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("klians");

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("klians");

        Self {
            server: ServerConfig::default(),
            account: AccountConfig::default(),
            feed: FeedSettings::default(),
            messages: MessagesConfig::default(),
            realtime: RealtimeSettings::default(),
            paths: PathConfig {
                config_dir,
                data_dir,
            },
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if absent
    pub fn load() -> Result<Self> {
        let defaults = Config::default();
        let config_path = defaults.config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            defaults.save()?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(defaults)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to `config_dir/daemon.toml`
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(self.config_path(), contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.paths.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Get the client ID file path (for persisting auto-generated IDs)
    pub fn client_id_path(&self) -> PathBuf {
        self.paths.data_dir.join(CLIENT_ID_FILE_NAME)
    }

    /// Load the client ID from config or saved file
    ///
    /// Priority:
    /// 1. Config file client_id setting
    /// 2. Saved client_id file
    /// 3. None (caller should generate new)
    pub fn load_client_id(&self) -> Option<String> {
        if let Some(ref id) = self.account.client_id {
            return Some(id.clone());
        }

        let path = self.client_id_path();
        if let Ok(id) = fs::read_to_string(&path) {
            let id = id.trim().to_string();
            if !id.is_empty() {
                tracing::info!("Loaded client ID from {}", path.display());
                return Some(id);
            }
        }

        None
    }

    /// Save a generated client ID to file
    pub fn save_client_id(&self, client_id: &str) -> Result<()> {
        let path = self.client_id_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        fs::write(&path, client_id).context("Failed to save client ID")?;
        tracing::info!("Saved client ID to {}", path.display());
        Ok(())
    }

    /// Existing client ID, or a new v4 UUID persisted for next time
    pub fn load_or_create_client_id(&self) -> Result<String> {
        if let Some(id) = self.load_client_id() {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.save_client_id(&id)?;
        Ok(id)
    }

    pub fn api_config(&self, client_id: String) -> ApiConfig {
        let mut api = ApiConfig::default()
            .with_base_url(&self.server.api_base_url)
            .with_client_id(client_id);
        if let Some(token) = &self.account.token {
            api = api.with_token(token);
        }
        api.timeout = Duration::from_secs(self.server.request_timeout_secs);
        api.page_size = self.feed.page_size;
        api
    }

    pub fn realtime_config(&self) -> Option<RealtimeConfig> {
        if !self.realtime.enabled {
            return None;
        }
        Some(RealtimeConfig {
            url: self.server.realtime_url.clone(),
            token: self.account.token.clone(),
            max_reconnect_attempts: self.realtime.max_reconnect_attempts,
            ..RealtimeConfig::default()
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            feed: FeedConfig {
                pin_window: self.feed.pin_window(),
                ..FeedConfig::default()
            },
            realtime: self.realtime_config(),
            cache_dir: self.feed.use_cache.then(|| self.paths.data_dir.clone()),
            history_limit: self.messages.history_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            paths: PathConfig {
                config_dir: dir.path().join("config"),
                data_dir: dir.path().join("data"),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.api_base_url, "http://localhost:5000/api");
        assert_eq!(config.feed.pin_window_hours, 24);
        assert_eq!(config.messages.history_limit, 500);
        assert!(config.realtime.enabled);
        assert!(config.paths.config_dir.ends_with("klians"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.realtime_url, config.server.realtime_url);
        assert_eq!(parsed.feed.page_size, config.feed.page_size);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            api_base_url = "https://klians.example/api"

            [account]
            email = "me@klians.edu"

            [paths]
            config_dir = "/tmp/klians"
            data_dir = "/tmp/klians-data"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.server.api_base_url, "https://klians.example/api");
        assert_eq!(parsed.server.request_timeout_secs, 15);
        assert_eq!(parsed.account.email, "me@klians.edu");
        assert!(parsed.account.token.is_none());
        assert_eq!(parsed.realtime.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.account.email = "me@klians.edu".to_string();
        config.save().unwrap();

        let loaded = Config::load_from(&config.config_path()).unwrap();
        assert_eq!(loaded.account.email, "me@klians.edu");
    }

    #[test]
    fn test_client_id_generated_once() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        assert!(config.load_client_id().is_none());

        let first = config.load_or_create_client_id().unwrap();
        let second = config.load_or_create_client_id().unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_configured_client_id_wins() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.save_client_id("from-file").unwrap();
        config.account.client_id = Some("from-config".to_string());
        assert_eq!(config.load_client_id().as_deref(), Some("from-config"));
    }

    #[test]
    fn test_session_config_mapping() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.feed.pin_window_hours = 12;
        config.realtime.enabled = false;
        config.account.token = Some("t".to_string());

        let session = config.session_config();
        assert_eq!(session.feed.pin_window, chrono::Duration::hours(12));
        assert!(session.realtime.is_none());
        assert_eq!(session.cache_dir, Some(dir.path().join("data")));

        config.feed.pin_window_hours = i64::MAX;
        assert_eq!(
            config.session_config().feed.pin_window,
            klians_core::models::default_pin_window()
        );
        config.feed.pin_window_hours = 0;
        assert_eq!(
            config.session_config().feed.pin_window,
            klians_core::models::default_pin_window()
        );

        let api = config.api_config("cid".to_string());
        assert_eq!(api.token.as_deref(), Some("t"));
        assert_eq!(api.client_id.as_deref(), Some("cid"));
        assert_eq!(api.timeout, Duration::from_secs(15));
    }
}
