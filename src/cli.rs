// src/cli.rs

//! CLI argument parsing using `clap`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `runstop`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runstop",
    version,
    about = "Run a program, then stop it gracefully from another shell.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Runstop.toml` in the current directory, if it exists.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Coordination directory shared by `run` and `stop`.
    ///
    /// Overrides `RUNSTOP_TERMINATION_DIR` and `[coordination].dir`.
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNSTOP_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve and print the configuration, but don't touch anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a program until it exits; it is told where its signal file will
    /// appear through an environment variable.
    Run {
        /// Environment variable that carries the signal file path.
        #[arg(long, value_name = "NAME")]
        env_var: Option<String>,

        /// Program and its arguments, e.g. `runstop run -- ./server --port 80`.
        #[arg(
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "PROGRAM"
        )]
        program: Vec<OsString>,
    },

    /// Ask the most recently started program to stop and wait for it.
    Stop {
        /// Seconds to wait before giving up.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List running programs.
    Status,

    /// Remove entries left behind by crashed runs.
    Clean,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
