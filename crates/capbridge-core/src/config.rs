//! Bridge configuration
//!
//! Loaded from a JSON file; every field has a default so a missing file or a
//! partial one is fine.
//!
//! ```json
//! {
//!   "dialog_timeout_secs": null,
//!   "watch_debounce_ms": 500,
//!   "watch_policy": "selected_only",
//!   "dialog_filters": ["*.vrm"],
//!   "max_message_bytes": 16777216
//! }
//! ```

use crate::bridge::DEFAULT_MAX_LINE_BYTES;
use crate::error::{ConfigError, Error, Result};
use crate::host::WatchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host and client give up on a dialog after this long. `None` waits forever.
    pub dialog_timeout_secs: Option<u64>,
    pub watch_debounce_ms: u64,
    pub watch_policy: WatchPolicy,
    /// Glob patterns a selected file name must match (any of them)
    pub dialog_filters: Vec<String>,
    pub max_message_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dialog_timeout_secs: None,
            watch_debounce_ms: 500,
            watch_policy: WatchPolicy::default(),
            dialog_filters: vec!["*.vrm".to_string()],
            max_message_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl BridgeConfig {
    /// `<config dir>/capbridge/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("capbridge").join("config.json"))
    }

    /// Load from an explicit file. The file must exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(ConfigError::NotFound(
                path.to_string_lossy().to_string(),
            )));
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            other => {
                debug!("No config file at {:?}, using defaults", other);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch_debounce_ms == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "watch_debounce_ms",
                reason: "must be greater than zero".to_string(),
            }));
        }
        if self.max_message_bytes == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "max_message_bytes",
                reason: "must be greater than zero".to_string(),
            }));
        }
        if self.dialog_timeout_secs == Some(0) {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "dialog_timeout_secs",
                reason: "use null to disable the timeout".to_string(),
            }));
        }
        self.dialog_patterns()?;
        Ok(())
    }

    pub fn dialog_timeout(&self) -> Option<Duration> {
        self.dialog_timeout_secs.map(Duration::from_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Compiled dialog filters
    pub fn dialog_patterns(&self) -> Result<Vec<glob::Pattern>> {
        self.dialog_filters
            .iter()
            .map(|raw| {
                glob::Pattern::new(raw).map_err(|e| {
                    Error::Config(ConfigError::InvalidFilter {
                        pattern: raw.clone(),
                        reason: e.msg.to_string(),
                    })
                })
            })
            .collect()
    }
}
