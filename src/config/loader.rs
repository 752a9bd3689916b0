// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Error, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** validate values.
/// Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;

    let mut config: RawConfigFile = toml::from_str(&contents)?;

    if let Some(dir) = config.coordination.dir.take() {
        config.coordination.dir = Some(resolve_against(path, dir));
    }

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
///
/// The tool works without any config file at all; only an explicitly named
/// file that is absent is treated as an error by the caller.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(ConfigFile::default());
    }
    load_and_validate(path)
}

/// Default config location: `Runstop.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Runstop.toml")
}

/// Relative `dir` values are relative to the config file, not the cwd.
fn resolve_against(config_path: &Path, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        return dir;
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(dir),
        _ => dir,
    }
}
