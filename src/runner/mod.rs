// src/runner/mod.rs

//! The task-runner side of run/stop.
//!
//! - [`run_program`] claims a slot, launches a program with the signal path
//!   in its environment, waits for it and always releases the slot.
//! - [`stop_program`] signals the most recent live slot and waits for it to
//!   go away, on a blocking thread.
//! - [`status`] and [`clean`] inspect or tidy the coordination directory.

mod process;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ConfigFile;
use crate::coordinator::{self, CleanupReport, CoordinatorBuilder, Role, StopOutcome};
use crate::errors::{Error, Result};
use crate::lock::LockRegistry;
use crate::slot::SlotId;

/// Where and how to coordinate.
#[derive(Debug, Clone)]
pub struct CoordinationOptions {
    pub dir: PathBuf,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    /// `None` uses the process-wide registry.
    pub registry: Option<Arc<LockRegistry>>,
}

impl CoordinationOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: coordinator::DEFAULT_POLL_INTERVAL,
            stop_timeout: coordinator::DEFAULT_STOP_TIMEOUT,
            registry: None,
        }
    }

    pub fn from_config(cfg: &ConfigFile, cli_dir: Option<&Path>) -> Self {
        Self {
            dir: cfg.coordination_dir(cli_dir),
            poll_interval: cfg.poll_interval(),
            stop_timeout: cfg.stop_timeout(),
            registry: None,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn builder(&self) -> CoordinatorBuilder {
        let builder = CoordinatorBuilder::new(&self.dir)
            .poll_interval(self.poll_interval)
            .stop_timeout(self.stop_timeout);
        match &self.registry {
            Some(registry) => builder.registry(Arc::clone(registry)),
            None => builder,
        }
    }
}

/// A program to run under coordination.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Name of the environment variable carrying the signal path.
    pub env_var: String,
    /// Turn the first Ctrl-C into a stop request.
    pub forward_interrupt: bool,
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub slot: SlotId,
    /// `None` if the program was killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the signal entry was seen before the program exited.
    pub stop_requested: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `req` to completion inside a freshly claimed slot.
pub async fn run_program(opts: &CoordinationOptions, req: RunRequest) -> anyhow::Result<RunReport> {
    let mut coordinator = opts.builder().build(Role::Run)?;
    let signal = coordinator.prepare_to_run()?;
    let slot = coordinator.slot();

    let outcome = process::spawn_and_wait(
        &req.program,
        &req.args,
        &req.env_var,
        &signal,
        opts.poll_interval,
        req.forward_interrupt,
    )
    .await;

    // Release even when the program could not be started.
    let finished = coordinator.task_finished();
    let supervised = outcome?;
    finished?;

    Ok(RunReport {
        slot,
        exit_code: supervised.status.code(),
        stop_requested: supervised.stop_requested,
    })
}

/// Ask the most recent run task to stop and wait for it.
pub async fn stop_program(opts: &CoordinationOptions) -> Result<StopOutcome> {
    let builder = opts.builder();
    tokio::task::spawn_blocking(move || builder.build(Role::Stop)?.stop_run_task())
        .await
        .map_err(|e| Error::Other(anyhow::Error::new(e)))?
}

/// Slots currently held by a live run task. A missing directory has none.
pub fn status(opts: &CoordinationOptions) -> Result<Vec<SlotId>> {
    if !opts.dir.is_dir() {
        return Ok(Vec::new());
    }
    let registry = opts.registry.clone().unwrap_or_else(LockRegistry::process);
    coordinator::active_slots(&opts.dir, &registry)
}

/// Run only the cleanup pass.
pub fn clean(opts: &CoordinationOptions) -> Result<CleanupReport> {
    fs::create_dir_all(&opts.dir).map_err(|e| {
        Error::io(format!("creating coordination dir {}", opts.dir.display()), e)
    })?;
    let registry = opts.registry.clone().unwrap_or_else(LockRegistry::process);
    let report = coordinator::cleanup(&opts.dir, &registry)?;
    info!(
        stale_locks = report.stale_locks.len(),
        orphan_signals = report.orphan_signals.len(),
        "cleanup finished"
    );
    Ok(report)
}
