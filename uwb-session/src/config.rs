//! Session configuration - stored as config.json in UWB_RANGER_HOME

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, UpdateRate};

/// Get UWB_RANGER_HOME directory, creating it if needed
pub fn ranger_home() -> Result<PathBuf, ConfigError> {
    let home = match std::env::var("UWB_RANGER_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".uwb-ranger"),
    };

    if !home.exists() {
        fs::create_dir_all(&home)?;
    }

    Ok(home)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub spec_ver_major: u16,
    pub spec_ver_minor: u16,
    pub channel: u8,
    pub preamble_index: u8,
    /// Hex encoded; must match the vendor id programmed into the device
    pub session_key: String,
    pub update_rate: UpdateRate,
    /// Send INITIALIZE as soon as the transport connects
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spec_ver_major: 0x0100,
            spec_ver_minor: 0x0000,
            channel: 9,
            preamble_index: 10,
            session_key: "0807010203040506".to_string(),
            update_rate: UpdateRate::Frequent,
            auto_start: true,
        }
    }
}

impl SessionConfig {
    pub fn session_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let key = data_encoding::HEXLOWER_PERMISSIVE
            .decode(self.session_key.trim().as_bytes())
            .map_err(|e| ConfigError::InvalidSessionKey(e.to_string()))?;
        if key.is_empty() {
            return Err(ConfigError::InvalidSessionKey("empty".to_string()));
        }
        Ok(key)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.session_key_bytes()?;
        Ok(config)
    }

    /// Load `<home>/config.json`, writing the defaults there first if missing
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        if path.exists() {
            return Self::load(&path);
        }

        let config = Self::default();
        fs::create_dir_all(home)?;
        fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        log::info!("wrote default config to {}", path.display());
        Ok(config)
    }
}
