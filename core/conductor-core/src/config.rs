//! Observer configuration loaded from `~/.conductor/config.toml`.
//!
//! Every section is optional. A missing file yields the defaults; a file that
//! exists but does not parse is an error, since silently ignoring a typo in a
//! threshold would be confusing.
//!
//! ```toml
//! [layout]
//! preset = "codex"
//!
//! [watch]
//! state_debounce_ms = 150
//!
//! [timeline]
//! dead_time_threshold_ms = 8000
//!
//! [health.workers]
//! budget_limit = 10000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};
use crate::health::HealthThresholds;
use crate::layout::LayoutConfig;
use crate::storage::StoragePaths;
use crate::timeline::TimelineConfig;
use crate::watcher::WatchConfig;

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV_VAR: &str = "CONDUCTOR_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub layout: LayoutConfig,
    pub watch: WatchConfig,
    pub timeline: TimelineConfig,
    pub health: HealthThresholds,
}

impl ObserverConfig {
    /// Loads the config from an explicit path, `$CONDUCTOR_CONFIG`, or the
    /// default location, in that order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path),
            None => match std::env::var_os(CONFIG_ENV_VAR) {
                Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
                _ => StoragePaths::discover().map(|storage| storage.config_file()),
            },
        };

        match config_path {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs_err::read_to_string(path)
            .map_err(|e| ConductorError::io("Failed to read config", e))?;
        toml::from_str::<ObserverConfig>(&content).map_err(|err| ConductorError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }
}
