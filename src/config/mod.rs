// src/config/mod.rs

//! Configuration loading and validation for runstop.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate timing and naming values (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, CoordinationSection, DEFAULT_SIGNAL_ENV_VAR, DIR_ENV_VAR, RawConfigFile,
    RunSection,
};
pub use validate::validate_env_var;
