// src/lib.rs

//! Run/stop coordination through a shared directory.
//!
//! `runstop run -- <program>` claims a slot in the coordination directory and
//! tells the program, through an environment variable, which file will
//! appear when it should exit. A later `runstop stop`, from any shell,
//! creates that file for the most recently started run and waits until the
//! run has cleaned up after itself. No daemon is involved: the slots are
//! plain files guarded by advisory locks.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod runner;
pub mod slot;

pub use coordinator::{Coordinator, CoordinatorBuilder, Role, StopOutcome};
pub use errors::{Error, Result};
pub use lock::LockRegistry;
pub use slot::SlotId;

use std::time::Duration;

use anyhow::bail;
use tracing::debug;

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, default_config_path, load_and_validate, load_or_default};
use crate::runner::{CoordinationOptions, RunRequest};

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> anyhow::Result<i32> {
    let cfg = match &args.config {
        Some(path) => load_and_validate(path)?,
        None => load_or_default(default_config_path())?,
    };
    let opts = CoordinationOptions::from_config(&cfg, args.dir.as_deref());

    if args.dry_run {
        print_dry_run(&cfg, &opts, &args.command);
        return Ok(0);
    }

    match args.command {
        Command::Run { env_var, program } => {
            let env_var = env_var.unwrap_or_else(|| cfg.run.env_var.clone());
            config::validate_env_var(&env_var)?;

            let Some((program, rest)) = program.split_first() else {
                bail!("no program given to run");
            };

            let report = runner::run_program(
                &opts,
                RunRequest {
                    program: program.clone(),
                    args: rest.to_vec(),
                    env_var,
                    forward_interrupt: true,
                },
            )
            .await?;

            debug!(?report, "run finished");
            Ok(report.exit_code.unwrap_or(1))
        }

        Command::Stop { timeout } => {
            let opts = match timeout {
                Some(secs) => opts.with_stop_timeout(Duration::from_secs(secs)),
                None => opts,
            };
            match runner::stop_program(&opts).await? {
                StopOutcome::Stopped(slot) => println!("stopped slot {slot}"),
                StopOutcome::AlreadyFinished(slot) => {
                    println!("slot {slot} had already finished")
                }
            }
            Ok(0)
        }

        Command::Status => {
            let slots = runner::status(&opts)?;
            if slots.is_empty() {
                println!("no running application");
            }
            for slot in slots {
                println!("slot {slot}");
            }
            Ok(0)
        }

        Command::Clean => {
            let report = runner::clean(&opts)?;
            println!(
                "removed {} stale lock(s), {} orphaned signal(s)",
                report.stale_locks.len(),
                report.orphan_signals.len()
            );
            Ok(0)
        }
    }
}

/// Dry-run output: the resolved settings and the command that would run.
fn print_dry_run(cfg: &ConfigFile, opts: &CoordinationOptions, command: &Command) {
    println!("runstop dry-run");
    println!("  coordination.dir = {}", opts.dir.display());
    println!(
        "  coordination.poll_interval_ms = {}",
        cfg.coordination.poll_interval_ms
    );
    println!(
        "  coordination.stop_timeout_secs = {}",
        cfg.coordination.stop_timeout_secs
    );
    println!("  run.env_var = {}", cfg.run.env_var);
    println!();

    match command {
        Command::Run { env_var, program } => {
            if let Some(var) = env_var {
                println!("  env var override: {var}");
            }
            let shown: Vec<_> = program.iter().map(|p| p.to_string_lossy()).collect();
            println!("would run: {}", shown.join(" "));
        }
        Command::Stop { timeout } => match timeout {
            Some(secs) => println!("would stop the latest run (timeout {secs}s)"),
            None => println!("would stop the latest run"),
        },
        Command::Status => println!("would list running programs"),
        Command::Clean => println!("would remove abandoned slot entries"),
    }

    debug!("dry-run complete (nothing touched)");
}
