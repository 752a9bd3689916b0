// tests/runner_interrupt.rs
//
// Sends SIGINT to the test process itself, so it lives in its own binary.
#![cfg(unix)]

mod common;
use crate::common::{CoordDir, TestResult, init_tracing, with_timeout};

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use runstop::runner::{self, CoordinationOptions, RunRequest};
use runstop::{LockRegistry, SlotId};

fn interrupt_self() {
    let status = std::process::Command::new("kill")
        .arg("-INT")
        .arg(std::process::id().to_string())
        .status()
        .expect("running kill");
    assert!(status.success());
}

async fn wait_for_file(path: &Path) {
    with_timeout(async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_interrupt_requests_stop_second_kills() -> TestResult {
    init_tracing();
    let dir = CoordDir::new();
    let ready = dir.path().with_file_name("ready");

    let opts = CoordinationOptions {
        dir: dir.path().to_path_buf(),
        poll_interval: Duration::from_millis(20),
        stop_timeout: Duration::from_secs(5),
        registry: Some(Arc::new(LockRegistry::new())),
    };
    // Ignores its signal entry, so only a kill ends it.
    let script = format!(
        r#"touch "{}"; while true; do sleep 0.05; done"#,
        ready.display()
    );
    let req = RunRequest {
        program: OsString::from("sh"),
        args: vec![OsString::from("-c"), OsString::from(script)],
        env_var: "RUNSTOP_TERMINATION_FILE".to_string(),
        forward_interrupt: true,
    };

    let run = tokio::spawn(async move { runner::run_program(&opts, req).await });

    wait_for_file(&ready).await;
    // Let the runner start listening for Ctrl-C.
    tokio::time::sleep(Duration::from_millis(200)).await;

    interrupt_self();
    wait_for_file(&dir.paths(0).signal).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished(), "first Ctrl-C must not end the run");

    interrupt_self();
    let report = with_timeout(run).await??;

    assert_eq!(report.slot, SlotId(0));
    assert_eq!(report.exit_code, None, "program should have been killed");
    assert!(report.stop_requested);
    assert!(dir.slot_entries().is_empty(), "left: {:?}", dir.slot_entries());
    Ok(())
}
