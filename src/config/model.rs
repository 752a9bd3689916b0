// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::slot::DEFAULT_DIR_NAME;

/// Environment variable the launched program reads its signal path from.
pub const DEFAULT_SIGNAL_ENV_VAR: &str = "RUNSTOP_TERMINATION_FILE";

/// Environment variable that overrides the coordination directory.
pub const DIR_ENV_VAR: &str = "RUNSTOP_TERMINATION_DIR";

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [coordination]
/// dir = ".runstop/termination"
/// poll_interval_ms = 300
/// stop_timeout_secs = 60
///
/// [run]
/// env_var = "RUNSTOP_TERMINATION_FILE"
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub coordination: CoordinationSection,

    #[serde(default)]
    pub run: RunSection,
}

/// `[coordination]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinationSection {
    /// Coordination directory. Relative paths are resolved against the
    /// directory holding the config file.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Pause between checks while waiting for a run task to stop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long `stop` waits before giving up.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_stop_timeout_secs() -> u64 {
    60
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    #[serde(default = "default_env_var")]
    pub env_var: String,
}

fn default_env_var() -> String {
    DEFAULT_SIGNAL_ENV_VAR.to_string()
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            env_var: default_env_var(),
        }
    }
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub coordination: CoordinationSection,
    pub run: RunSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(coordination: CoordinationSection, run: RunSection) -> Self {
        Self { coordination, run }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.coordination.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.coordination.stop_timeout_secs)
    }

    /// Pick the coordination directory.
    ///
    /// Priority: `cli_dir`, then `RUNSTOP_TERMINATION_DIR`, then
    /// `[coordination].dir`, then `build/termination`.
    pub fn coordination_dir(&self, cli_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = cli_dir {
            return dir.to_path_buf();
        }
        if let Some(dir) = std::env::var_os(DIR_ENV_VAR).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        self.coordination
            .dir
            .clone()
            .unwrap_or_else(|| Path::new("build").join(DEFAULT_DIR_NAME))
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(CoordinationSection::default(), RunSection::default())
    }
}
