// src/lock/registry.rs

//! In-process registry of lock entries this process currently holds.
//!
//! Advisory locks taken through two different handles in the same process
//! would simply contend with each other, turning a protocol bug into a silent
//! "failed to start". The registry catches that case up front.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

static PROCESS_REGISTRY: LazyLock<Arc<LockRegistry>> =
    LazyLock::new(|| Arc::new(LockRegistry::new()));

/// Set of resolved lock-entry paths held by this process.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<PathBuf>>,
}

impl LockRegistry {
    /// A private registry. Mostly useful in tests that simulate several
    /// processes inside one test binary.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every coordinator in this process.
    pub fn process() -> Arc<LockRegistry> {
        Arc::clone(&PROCESS_REGISTRY)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.guard().contains(path)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Returns `false` if the path was already registered.
    pub(crate) fn insert(&self, path: &Path) -> bool {
        self.guard().insert(path.to_path_buf())
    }

    pub(crate) fn remove(&self, path: &Path) {
        self.guard().remove(path);
    }

    // A panic while holding the set cannot leave it half-updated.
    fn guard(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
