// src/coordinator/mod.rs

//! Run/stop coordination through a shared directory.
//!
//! A run task builds a [`Coordinator`] with [`Role::Run`], calls
//! [`Coordinator::prepare_to_run`] to claim a fresh slot, hands the returned
//! signal path to the program it launches, and calls
//! [`Coordinator::task_finished`] once that program exits.
//!
//! A later, independent invocation builds a [`Role::Stop`] coordinator,
//! which targets the most recently allocated live slot, and calls
//! [`Coordinator::stop_run_task`].
//!
//! Construction always creates the directory if needed and runs a cleanup
//! pass first (see [`scan::cleanup`]).

pub mod scan;
pub mod stop;

pub use scan::{CleanupReport, active_slots, cleanup, highest_slot_id, last_lock_id};
pub use stop::StopOutcome;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::lock::{LockRegistry, SlotLock};
use crate::slot::{self, SlotId, SlotPaths};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Which side of the protocol a coordinator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Run,
    Stop,
}

/// Builder for [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorBuilder {
    dir: PathBuf,
    registry: Option<Arc<LockRegistry>>,
    poll_interval: Duration,
    stop_timeout: Duration,
}

impl CoordinatorBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registry: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Use a specific lock registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<LockRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn build(self, role: Role) -> Result<Coordinator> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::io(format!("creating coordination dir {}", self.dir.display()), e)
        })?;
        // Registry keys must not depend on how the caller spelled the path.
        let dir = fs::canonicalize(&self.dir).map_err(|e| {
            Error::io(format!("resolving coordination dir {}", self.dir.display()), e)
        })?;

        let registry = self.registry.unwrap_or_else(LockRegistry::process);

        scan::cleanup(&dir, &registry)?;
        let last_live = scan::last_lock_id(&dir)?;

        let slot = match role {
            Role::Run => {
                let counter = slot::read_counter(&dir)?;
                match counter.max(last_live) {
                    Some(last) => last.next(),
                    None => SlotId(0),
                }
            }
            Role::Stop => last_live.ok_or(Error::NoRunningApplication)?,
        };

        debug!(dir = %dir.display(), ?role, slot = %slot, "coordinator ready");

        Ok(Coordinator {
            paths: SlotPaths::new(&dir, slot),
            dir,
            role,
            slot,
            registry,
            poll_interval: self.poll_interval,
            stop_timeout: self.stop_timeout,
            held: None,
        })
    }
}

/// One participant in the run/stop protocol for a coordination directory.
///
/// A run-role coordinator still holding its slot when dropped finishes the
/// task itself, so the lock and both entries never outlive it.
#[derive(Debug)]
pub struct Coordinator {
    dir: PathBuf,
    role: Role,
    slot: SlotId,
    paths: SlotPaths,
    registry: Arc<LockRegistry>,
    poll_interval: Duration,
    stop_timeout: Duration,
    held: Option<SlotLock>,
}

impl Coordinator {
    pub fn builder(dir: impl Into<PathBuf>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(dir)
    }

    pub fn for_run(dir: impl Into<PathBuf>) -> Result<Self> {
        CoordinatorBuilder::new(dir).build(Role::Run)
    }

    /// Fails with [`Error::NoRunningApplication`] if no live slot exists.
    pub fn for_stop(dir: impl Into<PathBuf>) -> Result<Self> {
        CoordinatorBuilder::new(dir).build(Role::Stop)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The slot this coordinator allocates (run) or targets (stop).
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn signal_path(&self) -> &Path {
        &self.paths.signal
    }

    pub fn lock_path(&self) -> &Path {
        &self.paths.lock
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Claim the slot. Returns the signal path the launched program should
    /// watch; it does not exist yet.
    pub fn prepare_to_run(&mut self) -> Result<PathBuf> {
        if self.role != Role::Run {
            return Err(Error::Protocol("prepare_to_run called on a stop coordinator"));
        }
        if self.held.is_some() {
            return Err(Error::Protocol(
                "prepare_to_run called again before task_finished",
            ));
        }

        let Some(lock) = SlotLock::try_acquire(&self.paths.lock, &self.registry)? else {
            warn!(slot = %self.slot, "slot is locked by another process");
            return Err(Error::FailedToStart { slot: self.slot });
        };

        if let Err(e) = slot::bump_counter(&self.dir, self.slot) {
            if let Err(cleanup) = lock.release_and_remove(&self.paths.signal) {
                warn!(slot = %self.slot, error = %cleanup, "failed to undo slot claim");
            }
            return Err(e);
        }

        info!(
            slot = %self.slot,
            signal = %self.paths.signal.display(),
            "slot acquired"
        );
        self.held = Some(lock);
        Ok(self.paths.signal.clone())
    }

    /// Release the slot and delete its signal and lock entries.
    pub fn task_finished(&mut self) -> Result<()> {
        let Some(lock) = self.held.take() else {
            return Err(Error::Protocol(
                "task_finished called without a successful prepare_to_run",
            ));
        };

        lock.release_and_remove(&self.paths.signal)?;
        info!(slot = %self.slot, "slot released");
        Ok(())
    }

    /// Ask the run task owning the target slot to stop and wait for it.
    ///
    /// Blocks for up to the configured stop timeout.
    pub fn stop_run_task(&self) -> Result<StopOutcome> {
        if self.role != Role::Stop {
            return Err(Error::Protocol("stop_run_task called on a run coordinator"));
        }

        stop::StopRequest {
            dir: &self.dir,
            slot: self.slot,
            paths: &self.paths,
            registry: &self.registry,
            poll_interval: self.poll_interval,
            timeout: self.stop_timeout,
        }
        .execute()
    }

    /// Slots whose lock is currently held by some process.
    pub fn active_slots(&self) -> Result<Vec<SlotId>> {
        scan::active_slots(&self.dir, &self.registry)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.held.is_some() {
            warn!(slot = %self.slot, "coordinator dropped while holding its slot; releasing");
            if let Err(e) = self.task_finished() {
                warn!(slot = %self.slot, error = %e, "failed to release slot on drop");
            }
        }
    }
}
