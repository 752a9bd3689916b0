use std::path::PathBuf;

use runstop::config::{ConfigFile, CoordinationSection, RawConfigFile, RunSection};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                coordination: CoordinationSection::default(),
                run: RunSection::default(),
            },
        }
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.coordination.dir = Some(dir.into());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.coordination.poll_interval_ms = ms;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.coordination.stop_timeout_secs = secs;
        self
    }

    pub fn env_var(mut self, name: &str) -> Self {
        self.config.run.env_var = name.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
