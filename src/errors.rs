// src/errors.rs

//! Crate-wide error type and result alias.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::slot::SlotId;

#[derive(Error, Debug)]
pub enum Error {
    /// Another process already holds the lock for the slot we tried to claim.
    #[error("failed to start: slot {slot} is already locked by another process")]
    FailedToStart { slot: SlotId },

    #[error("no running application")]
    NoRunningApplication,

    #[error("stop timed out: slot {slot} still running after {waited:?}")]
    StopTimedOut { slot: SlotId, waited: Duration },

    #[error("stop failed for slot {slot}: {source}")]
    StopFailed {
        slot: SlotId,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The lock is already held by this very process.
    #[error("lock already held by this process: {0}")]
    AlreadyHeldInProcess(PathBuf),

    /// The run/stop call sequence was misused.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Text meant for the human operator running the tool.
    pub fn user_message(&self) -> String {
        match self {
            Error::FailedToStart { .. } => {
                "another run may already be starting, try again".to_string()
            }
            Error::NoRunningApplication => "no running application".to_string(),
            Error::StopTimedOut { waited, .. } => format!(
                "the application did not stop in time (waited {}s)",
                waited.as_secs()
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_match_operator_wording() {
        let e = Error::FailedToStart { slot: SlotId(3) };
        assert_eq!(e.user_message(), "another run may already be starting, try again");

        let e = Error::StopTimedOut {
            slot: SlotId(0),
            waited: Duration::from_secs(60),
        };
        assert!(e.user_message().starts_with("the application did not stop in time"));

        assert_eq!(Error::NoRunningApplication.user_message(), "no running application");
    }

    #[test]
    fn io_error_keeps_context() {
        let e = Error::io(
            "creating coordination dir",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(e.to_string(), "creating coordination dir: denied");
    }
}
