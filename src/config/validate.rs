// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Error, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::Error;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.coordination, raw.run))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_timing(cfg)?;
    validate_env_var(&cfg.run.env_var)?;
    Ok(())
}

fn validate_timing(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.coordination;

    if c.poll_interval_ms == 0 {
        return Err(Error::Config(
            "[coordination].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    if c.stop_timeout_secs.saturating_mul(1000) < c.poll_interval_ms {
        return Err(Error::Config(format!(
            "[coordination].stop_timeout_secs ({}s) is shorter than poll_interval_ms ({}ms)",
            c.stop_timeout_secs, c.poll_interval_ms
        )));
    }

    Ok(())
}

/// Also used for the `--env-var` CLI override.
pub fn validate_env_var(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("[run].env_var must not be empty".to_string()));
    }
    if name.contains('=') || name.contains('\0') {
        return Err(Error::Config(format!(
            "[run].env_var '{}' must not contain '=' or NUL",
            name.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfigFile {
        RawConfigFile::default()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ConfigFile::try_from(raw()).is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut cfg = raw();
        cfg.coordination.poll_interval_ms = 0;
        match ConfigFile::try_from(cfg) {
            Err(Error::Config(msg)) => assert!(msg.contains("poll_interval_ms")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn timeout_shorter_than_poll_is_rejected() {
        let mut cfg = raw();
        cfg.coordination.poll_interval_ms = 5_000;
        cfg.coordination.stop_timeout_secs = 1;
        assert!(matches!(ConfigFile::try_from(cfg), Err(Error::Config(_))));
    }

    #[test]
    fn bad_env_var_names_are_rejected() {
        for bad in ["", "A=B", "NUL\0"] {
            let mut cfg = raw();
            cfg.run.env_var = bad.to_string();
            assert!(matches!(ConfigFile::try_from(cfg), Err(Error::Config(_))), "{bad:?}");
        }
    }
}
