// src/runner/process.rs

//! Launching and supervising the program of a run task.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How the supervised program ended.
#[derive(Debug)]
pub(crate) struct Supervised {
    pub status: ExitStatus,
    pub stop_requested: bool,
}

/// Spawn `program`, exposing the signal path through `env_var`, and wait
/// for it to exit.
///
/// While waiting, the signal path is polled only to report when a stop was
/// requested; reacting to it is the program's job. With `forward_interrupt`,
/// the first Ctrl-C creates the signal entry so the program can shut down
/// through the same path as a `stop`, and a second Ctrl-C kills it.
pub(crate) async fn spawn_and_wait(
    program: &OsString,
    args: &[OsString],
    env_var: &str,
    signal: &Path,
    poll_interval: Duration,
    forward_interrupt: bool,
) -> Result<Supervised> {
    let mut cmd = Command::new(program);
    cmd.args(args).env(env_var, signal);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", program.to_string_lossy()))?;

    info!(
        program = %program.to_string_lossy(),
        pid = child.id(),
        env_var,
        "program started"
    );

    let mut ticker = tokio::time::interval(poll_interval);
    let mut stop_requested = false;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut listen_for_interrupt = forward_interrupt;
    let mut interrupts = 0u32;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.with_context(|| {
                    format!("waiting for {}", program.to_string_lossy())
                })?;
                info!(
                    exit_code = status.code(),
                    success = status.success(),
                    stop_requested,
                    "program exited"
                );
                return Ok(Supervised { status, stop_requested });
            }

            _ = ticker.tick(), if !stop_requested => {
                if signal.exists() {
                    info!(signal = %signal.display(), "stop requested; waiting for program to exit");
                    stop_requested = true;
                }
            }

            res = &mut interrupt, if listen_for_interrupt => {
                if let Err(e) = res {
                    debug!(error = %e, "cannot listen for Ctrl-C");
                    listen_for_interrupt = false;
                    continue;
                }
                interrupt.set(tokio::signal::ctrl_c());
                interrupts += 1;

                if interrupts == 1 {
                    info!("interrupted; asking program to stop (Ctrl-C again to kill it)");
                    if let Err(e) = touch(signal) {
                        warn!(error = %e, "failed to create signal entry on interrupt");
                    }
                } else {
                    warn!("interrupted again; killing program");
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill program");
                    }
                }
            }
        }
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(drop)
}
