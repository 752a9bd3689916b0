// tests/runner_process.rs
#![cfg(unix)]

mod common;
use crate::common::builders::ConfigFileBuilder;
use crate::common::{CoordDir, TestResult, init_tracing, with_timeout};

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use runstop::runner::{self, CoordinationOptions, RunRequest};
use runstop::{LockRegistry, SlotId, StopOutcome};

fn options(dir: &CoordDir) -> CoordinationOptions {
    CoordinationOptions {
        dir: dir.path().to_path_buf(),
        poll_interval: Duration::from_millis(20),
        stop_timeout: Duration::from_secs(5),
        registry: Some(Arc::new(LockRegistry::new())),
    }
}

fn sh(script: &str, env_var: &str) -> RunRequest {
    RunRequest {
        program: OsString::from("sh"),
        args: vec![OsString::from("-c"), OsString::from(script)],
        env_var: env_var.to_string(),
        forward_interrupt: false,
    }
}

/// Exits as soon as the file named by `$VAR` exists.
fn wait_for_signal(var: &str) -> String {
    format!(r#"while [ ! -e "${var}" ]; do sleep 0.05; done; exit 0"#)
}

#[tokio::test]
async fn run_reports_program_exit_code() -> TestResult {
    init_tracing();
    let dir = CoordDir::new();

    let report = with_timeout(runner::run_program(
        &options(&dir),
        sh("exit 3", "RUNSTOP_TERMINATION_FILE"),
    ))
    .await?;

    assert_eq!(report.slot, SlotId(0));
    assert_eq!(report.exit_code, Some(3));
    assert!(!report.success());
    assert!(!report.stop_requested);
    assert!(dir.slot_entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn program_sees_signal_path_in_env() -> TestResult {
    init_tracing();
    let dir = CoordDir::new();

    let script = r#"case "$MY_TERM" in */term.file0) exit 0 ;; *) exit 7 ;; esac"#;
    let report = with_timeout(runner::run_program(&options(&dir), sh(script, "MY_TERM"))).await?;

    assert!(report.success(), "program saw {:?}", report.exit_code);
    Ok(())
}

#[tokio::test]
async fn stop_from_another_invocation_ends_the_run() -> TestResult {
    init_tracing();
    let dir = CoordDir::new();
    let run_opts = options(&dir);
    let stop_opts = options(&dir);

    let run = tokio::spawn(async move {
        runner::run_program(
            &run_opts,
            sh(&wait_for_signal("RUNSTOP_TERMINATION_FILE"), "RUNSTOP_TERMINATION_FILE"),
        )
        .await
    });

    // Wait for the slot to be claimed.
    with_timeout(async {
        while runner::status(&stop_opts).map(|s| s.is_empty()).unwrap_or(true) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    let outcome = with_timeout(runner::stop_program(&stop_opts)).await?;
    assert_eq!(outcome, StopOutcome::Stopped(SlotId(0)));

    let report = with_timeout(run).await??;
    assert!(report.success());
    assert!(dir.slot_entries().is_empty());
    assert!(runner::status(&stop_opts)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_program_still_releases_slot() {
    init_tracing();
    let dir = CoordDir::new();

    let req = RunRequest {
        program: OsString::from("/definitely/not/a/program"),
        args: Vec::new(),
        env_var: "RUNSTOP_TERMINATION_FILE".to_string(),
        forward_interrupt: false,
    };
    let err = runner::run_program(&options(&dir), req).await.unwrap_err();
    assert!(format!("{err:#}").contains("spawning"));
    assert!(dir.slot_entries().is_empty());
}

#[tokio::test]
async fn clean_and_status_on_missing_dir() -> TestResult {
    init_tracing();
    let dir = CoordDir::new();
    let opts = options(&dir);

    assert!(runner::status(&opts)?.is_empty());
    let report = runner::clean(&opts)?;
    assert!(report.is_empty());
    assert!(dir.path().is_dir());
    Ok(())
}

#[test]
fn options_follow_config() {
    let cfg = ConfigFileBuilder::new()
        .dir("/srv/app/termination")
        .poll_interval_ms(50)
        .stop_timeout_secs(7)
        .env_var("APP_STOP_FILE")
        .build();

    let opts = CoordinationOptions::from_config(&cfg, None);
    assert_eq!(opts.poll_interval, Duration::from_millis(50));
    assert_eq!(opts.stop_timeout, Duration::from_secs(7));
    assert_eq!(cfg.run.env_var, "APP_STOP_FILE");

    let overridden = CoordinationOptions::from_config(&cfg, Some(std::path::Path::new("/tmp/x")));
    assert_eq!(overridden.dir, std::path::PathBuf::from("/tmp/x"));
}
