//! Configuration for the background geolocation plugin.

use crate::platform::PlatformFlavor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Host operating system the plugin runs on
    #[serde(default)]
    pub flavor: PlatformFlavor,

    /// Address lookup service settings
    #[serde(default)]
    pub address_lookup: AddressLookupConfig,

    /// Remote session document store settings
    #[serde(default)]
    pub session_store: SessionStoreConfig,

    /// Defaults for the background notification
    #[serde(default)]
    pub notification: NotificationDefaults,

    /// Timeout for each remote request
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub request_timeout: Duration,

    /// Path for storing diagnostics
    pub data_path: PathBuf,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for PluginConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("background-geolocation");

        Self {
            flavor: PlatformFlavor::default(),
            address_lookup: AddressLookupConfig::default(),
            session_store: SessionStoreConfig::default(),
            notification: NotificationDefaults::default(),
            request_timeout: default_timeout(),
            data_path: data_dir,
        }
    }
}

impl PluginConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: PluginConfig = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("background-geolocation")
            .join("config.json")
    }

    /// Path of the persisted diagnostics counters.
    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_path.join("diagnostics.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Whether enough is configured to forward fixes remotely.
    pub fn forwarding_configured(&self) -> bool {
        !self.session_store.project_id.is_empty()
    }
}

/// what3words lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressLookupConfig {
    pub base_url: String,
    /// Default key; a subscriber may override it per watcher
    pub api_key: Option<String>,
}

impl Default for AddressLookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.what3words.com".to_string(),
            api_key: None,
        }
    }
}

/// Firestore REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    pub base_url: String,
    pub project_id: String,
    pub collection: String,
    /// OAuth bearer token, if the database rules require one
    pub auth_token: Option<String>,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://firestore.googleapis.com".to_string(),
            project_id: String::new(),
            collection: "sessions".to_string(),
            auth_token: None,
        }
    }
}

/// Defaults for the background notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDefaults {
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Using your location".to_string(),
            channel_id: "background_geolocation".to_string(),
            channel_name: "Background Tracking".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
