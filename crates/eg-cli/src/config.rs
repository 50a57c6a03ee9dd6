//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use eg_core::EngineOptions;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Site identifier sent with every snapshot and used to namespace identity.
    pub client_id: String,
    /// Collection endpoint. Snapshots go to stdout when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Path to the identity database.
    pub store_path: PathBuf,
    #[serde(default)]
    pub engine: EngineOptions,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .field("store_path", &self.store_path)
            .field("engine", &self.engine)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            client_id: "default".to_string(),
            endpoint: None,
            store_path: data_dir.join("identity.db"),
            engine: EngineOptions::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // EG_CLIENT_ID, EG_ENGINE__IDLE_TIMEOUT_SECONDS, ...
        figment = figment.merge(Env::prefixed("EG_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for eg.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("eg"))
}

/// Returns the platform-specific data directory for eg.
///
/// On Linux: `~/.local/share/eg`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("eg"))
}
