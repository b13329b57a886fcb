use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration (loaded from passlink.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasslinkConfig {
    pub session: SessionSettings,
    pub transfer: TransferSettings,
    pub cache: CacheSettings,
    pub devices: DeviceSettings,
    pub logging: LoggingSettings,
}

impl PasslinkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// From socket open to `Ready` (default: 30)
    pub handshake_timeout_secs: u64,
    /// Maximum silence between inbound frames once `Ready` (default: 120)
    pub idle_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 30,
            idle_timeout_secs: 120,
        }
    }
}

impl SessionSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Outbound chunk size in bytes (default: 32768)
    pub max_chunk_size: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: passlink_protocol::DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// How long a revealed HIGHLY_SECRET value stays cached (default: 3)
    pub auto_forget_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            auto_forget_minutes: 3,
        }
    }
}

impl CacheSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.auto_forget_minutes * 60)
    }
}

/// What to do when a peer claims a device id already held by another
/// paired device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdCollisionPolicy {
    #[default]
    Reject,
    Overwrite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub id_collision_policy: IdCollisionPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
