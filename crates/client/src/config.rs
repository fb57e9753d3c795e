// Client configuration file.
//
// Global config: `~/.tandem/config.toml`

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tandem_common::awareness::{PresenceUser, Role};

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:1234";
pub const DEFAULT_EXECUTION_URL: &str = "https://emkc.org/api/v2/piston";

/// Root directory for tandem client state: `~/.tandem/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tandem"))
}

/// Path to the global config file: `~/.tandem/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Relay websocket base URL (e.g. `ws://localhost:1234`).
    pub relay_url: Option<String>,
    pub display_name: Option<String>,
    /// Presence color, `#rrggbb`.
    pub color: Option<String>,
    /// Piston-compatible execution API base URL.
    pub execution_url: Option<String>,
    /// SQLite database for saved files.
    pub files_db: Option<PathBuf>,
}

impl ClientConfig {
    /// Load from `~/.tandem/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "could not determine home directory"))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn relay_url(&self) -> &str {
        self.relay_url.as_deref().unwrap_or(DEFAULT_RELAY_URL)
    }

    pub fn execution_url(&self) -> &str {
        self.execution_url.as_deref().unwrap_or(DEFAULT_EXECUTION_URL)
    }

    /// Configured database path, else `~/.tandem/files.db`.
    pub fn files_db_path(&self) -> Option<PathBuf> {
        self.files_db.clone().or_else(|| global_dir().map(|d| d.join("files.db")))
    }

    /// Presence identity for a session. Missing name and color are made up
    /// per call, like an anonymous editor tab.
    pub fn identity(&self, role: Role) -> PresenceUser {
        let mut rng = rand::thread_rng();
        let name = self.display_name.clone().unwrap_or_else(|| format!("User {}", rng.gen_range(0..100)));
        let color = self.color.clone().unwrap_or_else(|| format!("#{:06x}", rng.gen_range(0..=0xff_ffffu32)));
        PresenceUser { name, color, role }
    }
}
