// src/coordinator/stop.rs

//! Stop side of the protocol: drop a signal entry and wait for the run task
//! to clean it up.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::lock::{self, LockRegistry};
use crate::slot::{self, SlotId, SlotPaths};

/// How a successful stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The run task saw the signal and finished.
    Stopped(SlotId),
    /// Nobody held the slot anymore; nothing was signalled.
    AlreadyFinished(SlotId),
}

impl StopOutcome {
    pub fn slot(&self) -> SlotId {
        match *self {
            StopOutcome::Stopped(id) | StopOutcome::AlreadyFinished(id) => id,
        }
    }
}

pub(crate) struct StopRequest<'a> {
    pub dir: &'a Path,
    pub slot: SlotId,
    pub paths: &'a SlotPaths,
    pub registry: &'a LockRegistry,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl StopRequest<'_> {
    pub(crate) fn execute(&self) -> Result<StopOutcome> {
        let slot = self.slot;

        if !self.held()? {
            info!(slot = %slot, "run task already finished; nothing to stop");
            return Ok(StopOutcome::AlreadyFinished(slot));
        }

        // Watch before creating the signal so its removal cannot slip by.
        let mut waker = DirWaker::new(self.dir);

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.paths.signal)
            .map_err(|source| Error::StopFailed { slot, source })?;
        info!(slot = %slot, signal = %self.paths.signal.display(), "stop requested");

        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            if !self.signal_exists()? {
                info!(slot = %slot, elapsed = ?started.elapsed(), "run task stopped");
                return Ok(StopOutcome::Stopped(slot));
            }

            // Owner died (or finished between our probe and the signal)
            // without removing the signal: retire it ourselves.
            if !self.held()? {
                slot::remove_if_exists(&self.paths.signal)
                    .map_err(|source| Error::StopFailed { slot, source })?;
                info!(slot = %slot, "run task exited without clearing its signal");
                return Ok(StopOutcome::Stopped(slot));
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(slot = %slot, timeout = ?self.timeout, "run task did not stop in time");
                return Err(Error::StopTimedOut {
                    slot,
                    waited: self.timeout,
                });
            }

            waker.wait(self.poll_interval.min(deadline - now));
        }
    }

    fn held(&self) -> Result<bool> {
        lock::probe_held(&self.paths.lock, self.registry).map_err(|e| self.stop_failed(e))
    }

    fn signal_exists(&self) -> Result<bool> {
        self.paths
            .signal
            .try_exists()
            .map_err(|source| Error::StopFailed {
                slot: self.slot,
                source,
            })
    }

    fn stop_failed(&self, err: Error) -> Error {
        match err {
            Error::Io { source, .. } => Error::StopFailed {
                slot: self.slot,
                source,
            },
            other => other,
        }
    }
}

/// Sleeps between polls, waking early when something changes in the
/// coordination directory. Falls back to plain sleeping if no watcher can
/// be set up.
struct DirWaker {
    inner: Option<(RecommendedWatcher, mpsc::Receiver<notify::Result<Event>>)>,
}

impl DirWaker {
    fn new(dir: &Path) -> Self {
        let (tx, rx) = mpsc::channel();
        let inner = notify::recommended_watcher(tx)
            .and_then(|mut w| w.watch(dir, RecursiveMode::NonRecursive).map(|()| w));

        match inner {
            Ok(watcher) => Self {
                inner: Some((watcher, rx)),
            },
            Err(e) => {
                debug!(error = %e, "directory watcher unavailable; polling only");
                Self { inner: None }
            }
        }
    }

    /// Returns after `max`, or earlier once something is removed.
    fn wait(&mut self, max: Duration) {
        let until = Instant::now() + max;

        let disconnected = match &self.inner {
            None => true,
            // Our own lock probes show up as open/close events; only a
            // removal can mean the signal entry went away.
            Some((_, rx)) => loop {
                let left = until.saturating_duration_since(Instant::now());
                match rx.recv_timeout(left) {
                    Ok(Ok(event)) if event.kind.is_remove() => break false,
                    Ok(_) => {}
                    Err(mpsc::RecvTimeoutError::Timeout) => break false,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break true,
                }
            },
        };

        if disconnected {
            self.inner = None;
            std::thread::sleep(until.saturating_duration_since(Instant::now()));
        }
    }
}
