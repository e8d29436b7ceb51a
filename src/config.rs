//! Client configuration.
//!
//! `DspConfig` can be built directly or loaded from TOML:
//!
//! ```toml
//! [dsp]
//! block_map_file = "site.bmap"
//! device_refresh_interval = 5
//! skip_block_types = ["GraphicEqualizer"]
//! ```
//!
//! Every field is optional; the refresh interval must be at least 1 second.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default device refresh interval in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DspConfig {
    /// Block map cache file. `None` disables the cache and always discovers.
    pub block_map_file: Option<PathBuf>,
    /// Poll interval for non-subscribable device attributes, in seconds (>= 1).
    pub device_refresh_interval: u64,
    /// Block type names to leave uninstantiated (speeds up startup on
    /// configurations with many unused blocks).
    pub skip_block_types: Vec<String>,
}

impl Default for DspConfig {
    fn default() -> Self {
        DspConfig {
            block_map_file: None,
            device_refresh_interval: DEFAULT_REFRESH_INTERVAL_SECS,
            skip_block_types: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    dsp: Option<RawDspConfig>,
}

#[derive(Debug, Deserialize)]
struct RawDspConfig {
    block_map_file: Option<String>,
    device_refresh_interval: Option<u64>,
    skip_block_types: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl DspConfig {
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(toml_str)?;
        let raw = raw.dsp.unwrap_or(RawDspConfig {
            block_map_file: None,
            device_refresh_interval: None,
            skip_block_types: None,
        });

        let device_refresh_interval = raw
            .device_refresh_interval
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
        if device_refresh_interval < 1 {
            return Err(ConfigError::InvalidValue(format!(
                "device_refresh_interval must be >= 1, got {}",
                device_refresh_interval
            )));
        }

        Ok(DspConfig {
            block_map_file: raw.block_map_file.map(PathBuf::from),
            device_refresh_interval,
            skip_block_types: raw.skip_block_types.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
