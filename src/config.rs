//! Control plane configuration
//!
//! Loaded from `control-plane.toml` in the platform config directory, or
//! from an explicit path. Every field has a default so partial files work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Error, Result};

/// File name looked up in the project config directory
pub const CONFIG_FILE_NAME: &str = "control-plane.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Stats collection and delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// How often raw statistics are sampled
    #[serde(default = "default_collection_interval_ms")]
    pub collection_interval_ms: u64,

    /// How often collected stats and traces are delivered
    #[serde(default = "default_delivery_interval_ms")]
    pub delivery_interval_ms: u64,

    /// Whether trace events are buffered at all
    #[serde(default = "default_tracing_enabled")]
    pub tracing_enabled: bool,

    /// Delay before an out-of-schedule delivery
    #[serde(default = "default_urgent_delivery_delay_ms")]
    pub urgent_delivery_delay_ms: u64,
}

/// Audio session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Poll period for the OS audio session snapshot
    #[serde(default = "default_system_poll_interval_ms")]
    pub system_poll_interval_ms: u64,
}

/// Publisher offer rewriting applied during migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Advertise discontinuous transmission on the opus format line
    #[serde(default = "default_opus_dtx_enabled")]
    pub opus_dtx_enabled: bool,

    /// Prefer the redundant audio payload in the publisher offer
    #[serde(default)]
    pub redundant_coding_enabled: bool,
}

fn default_collection_interval_ms() -> u64 {
    constants::DEFAULT_COLLECTION_INTERVAL_MS
}

fn default_delivery_interval_ms() -> u64 {
    constants::DEFAULT_DELIVERY_INTERVAL_MS
}

fn default_tracing_enabled() -> bool {
    true
}

fn default_urgent_delivery_delay_ms() -> u64 {
    constants::DEFAULT_URGENT_DELIVERY_DELAY_MS
}

fn default_system_poll_interval_ms() -> u64 {
    constants::DEFAULT_SYSTEM_POLL_INTERVAL_MS
}

fn default_opus_dtx_enabled() -> bool {
    true
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            collection_interval_ms: default_collection_interval_ms(),
            delivery_interval_ms: default_delivery_interval_ms(),
            tracing_enabled: default_tracing_enabled(),
            urgent_delivery_delay_ms: default_urgent_delivery_delay_ms(),
        }
    }
}

impl StatsConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection_interval_ms.max(1))
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_interval_ms)
    }

    pub fn urgent_delivery_delay(&self) -> Duration {
        Duration::from_millis(self.urgent_delivery_delay_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            system_poll_interval_ms: default_system_poll_interval_ms(),
        }
    }
}

impl AudioConfig {
    pub fn system_poll_interval(&self) -> Duration {
        Duration::from_millis(self.system_poll_interval_ms.max(1))
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            opus_dtx_enabled: default_opus_dtx_enabled(),
            redundant_coding_enabled: false,
        }
    }
}

impl ControlPlaneConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from an explicit path. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from the platform config directory, falling back to defaults
    /// when no file exists there.
    pub fn load_or_default() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Location of the config file, if the platform has a config directory
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "callcontrol", "control-plane")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
