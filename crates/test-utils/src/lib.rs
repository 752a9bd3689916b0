pub mod builders;
pub mod fake_run_task;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use fs2::FileExt;
use runstop::slot::{COUNTER_FILE, COUNTER_LOCK_FILE, SlotId, SlotPaths};
use runstop::{CoordinatorBuilder, LockRegistry};
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

pub use fake_run_task::{FakeRunTask, OnSignal};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Poll interval used by test coordinators.
pub const TEST_POLL: Duration = Duration::from_millis(20);

/// A scratch coordination directory.
pub struct CoordDir {
    _tmp: TempDir,
    path: PathBuf,
}

impl CoordDir {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("creating temp dir");
        let path = tmp.path().join("termination");
        Self { _tmp: tmp, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builder acting as a separate process: private registry, fast polling.
    pub fn process(&self) -> CoordinatorBuilder {
        CoordinatorBuilder::new(&self.path)
            .registry(Arc::new(LockRegistry::new()))
            .poll_interval(TEST_POLL)
    }

    pub fn paths(&self, id: u64) -> SlotPaths {
        SlotPaths::new(&self.path, SlotId(id))
    }

    /// Sorted file names currently in the directory (empty if it doesn't exist).
    pub fn entries(&self) -> Vec<String> {
        let Ok(read) = fs::read_dir(&self.path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = read
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Entries other than the slot counter and its lock.
    pub fn slot_entries(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|n| n != COUNTER_FILE && n != COUNTER_LOCK_FILE)
            .collect()
    }
}

impl Default for CoordDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Leave a lock entry on disk with nobody holding it, as a crashed run would.
pub fn plant_stale_lock(dir: &Path, id: u64) -> PathBuf {
    fs::create_dir_all(dir).expect("creating coordination dir");
    let path = SlotPaths::new(dir, SlotId(id)).lock;
    File::create(&path).expect("creating stale lock entry");
    path
}

/// Hold a slot's lock the way a foreign process would, bypassing the
/// coordinator. Dropping the returned file is that process dying.
pub fn hold_raw_lock(dir: &Path, id: u64) -> File {
    fs::create_dir_all(dir).expect("creating coordination dir");
    let path = SlotPaths::new(dir, SlotId(id)).lock;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .expect("opening lock entry");
    FileExt::try_lock_exclusive(&file).expect("locking entry");
    file
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}
