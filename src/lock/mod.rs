// src/lock/mod.rs

//! Advisory file locks on slot lock entries.
//!
//! - [`SlotLock`] is the RAII guard a run task holds for its whole lifetime.
//! - [`probe_held`] answers "is anybody holding this entry?" without keeping
//!   the lock.
//! - [`remove_if_stale`] deletes an entry nobody holds, under the probe lock.
//!
//! Locks are `flock`-style (via `fs2`), so they belong to the open file
//! description: two handles contend even inside one process, and the kernel
//! drops the lock when the owning process dies.

pub mod registry;

pub use registry::LockRegistry;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::slot::remove_if_exists;

/// Exclusive lock on a slot's lock entry.
///
/// Unlocks and leaves the in-process registry when dropped.
#[derive(Debug)]
pub struct SlotLock {
    path: PathBuf,
    file: File,
    registry: Arc<LockRegistry>,
}

impl SlotLock {
    /// Try to take the lock without blocking, creating the entry if needed.
    ///
    /// - `Ok(Some(_))`: we own the slot.
    /// - `Ok(None)`: another process holds it (or removed it under us).
    /// - `Err(AlreadyHeldInProcess)`: this process already owns it.
    pub fn try_acquire(path: &Path, registry: &Arc<LockRegistry>) -> Result<Option<SlotLock>> {
        if !registry.insert(path) {
            return Err(Error::AlreadyHeldInProcess(path.to_path_buf()));
        }

        match lock_entry(path) {
            Ok(Some(file)) => Ok(Some(SlotLock {
                path: path.to_path_buf(),
                file,
                registry: Arc::clone(registry),
            })),
            Ok(None) => {
                registry.remove(path);
                Ok(None)
            }
            Err(e) => {
                registry.remove(path);
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete `extra` (if present) and then the lock entry itself, and only
    /// afterwards give up the lock, so no other process can lock an entry
    /// that is about to vanish.
    pub fn release_and_remove(self, extra: &Path) -> Result<()> {
        remove_if_exists(extra)
            .map_err(|e| Error::io(format!("removing {}", extra.display()), e))?;

        if cfg!(unix) {
            remove_if_exists(&self.path)
                .map_err(|e| Error::io(format!("removing {}", self.path.display()), e))?;
            drop(self);
        } else {
            // Open files cannot be deleted on Windows.
            let path = self.path.clone();
            drop(self);
            remove_if_exists(&path)
                .map_err(|e| Error::io(format!("removing {}", path.display()), e))?;
        }
        Ok(())
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to unlock slot entry");
        }
        self.registry.remove(&self.path);
        debug!(path = %self.path.display(), "slot lock released");
    }
}

/// Whether some process (this one included) currently holds `path`.
///
/// A missing entry counts as not held.
pub fn probe_held(path: &Path, registry: &LockRegistry) -> Result<bool> {
    if registry.contains(path) {
        return Ok(true);
    }

    let Some(file) = open_existing(path)? else {
        return Ok(false);
    };

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(false)
        }
        Err(e) if is_contended(&e) => Ok(true),
        Err(e) => Err(Error::io(format!("probing lock {}", path.display()), e)),
    }
}

/// Delete `path` if nobody holds its lock. Returns whether it was deleted.
pub fn remove_if_stale(path: &Path, registry: &LockRegistry) -> Result<bool> {
    if registry.contains(path) {
        return Ok(false);
    }

    let Some(file) = open_existing(path)? else {
        return Ok(false);
    };

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if is_contended(&e) => return Ok(false),
        Err(e) => return Err(Error::io(format!("probing lock {}", path.display()), e)),
    }

    // The owner may have finished and a new run re-created the entry between
    // our open and our lock; that new entry is not ours to delete.
    if !still_linked(&file, path)? {
        let _ = FileExt::unlock(&file);
        return Ok(false);
    }

    let removed = if cfg!(unix) {
        let removed = remove_if_exists(path);
        let _ = FileExt::unlock(&file);
        removed
    } else {
        let _ = FileExt::unlock(&file);
        drop(file);
        remove_if_exists(path)
    };

    removed.map_err(|e| Error::io(format!("removing stale lock {}", path.display()), e))
}

/// How many times to re-create an entry that a concurrent cleanup unlinked
/// between our open and our lock.
const LOCK_ATTEMPTS: usize = 4;

fn lock_entry(path: &Path) -> Result<Option<File>> {
    for attempt in 1..=LOCK_ATTEMPTS {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(format!("opening lock {}", path.display()), e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(Error::io(format!("locking {}", path.display()), e)),
        }

        if still_linked(&file, path)? {
            return Ok(Some(file));
        }

        debug!(path = %path.display(), attempt, "lock entry was removed while locking; retrying");
        let _ = FileExt::unlock(&file);
    }

    Ok(None)
}

fn open_existing(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().read(true).open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(format!("opening lock {}", path.display()), e)),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Does `path` still name the file behind `file`?
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file
        .metadata()
        .map_err(|e| Error::io(format!("stat {}", path.display()), e))?;
    match std::fs::metadata(path) {
        Ok(on_disk) => Ok(on_disk.dev() == held.dev() && on_disk.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(format!("stat {}", path.display()), e)),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn private() -> Arc<LockRegistry> {
        Arc::new(LockRegistry::new())
    }

    #[test]
    fn acquire_creates_entry_and_registers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file0");
        let reg = private();

        let lock = SlotLock::try_acquire(&path, &reg).unwrap().expect("lock");
        assert!(path.exists());
        assert!(reg.contains(&path));
        assert_eq!(lock.path(), path.as_path());

        drop(lock);
        assert!(!reg.contains(&path));
        assert!(path.exists(), "dropping alone does not delete the entry");
    }

    #[test]
    fn same_registry_twice_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file0");
        let reg = private();

        let _held = SlotLock::try_acquire(&path, &reg).unwrap().expect("lock");
        match SlotLock::try_acquire(&path, &reg) {
            Err(Error::AlreadyHeldInProcess(p)) => assert_eq!(p, path),
            other => panic!("expected AlreadyHeldInProcess, got {other:?}"),
        }
        // The failed attempt must not unregister the real holder.
        assert!(reg.contains(&path));
    }

    #[test]
    fn other_holder_means_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file0");

        let _held = SlotLock::try_acquire(&path, &private()).unwrap().expect("lock");
        let other = private();
        assert!(SlotLock::try_acquire(&path, &other).unwrap().is_none());
        assert!(other.is_empty());
    }

    #[test]
    fn probe_sees_holders_and_missing_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file0");
        let reg = private();

        assert!(!probe_held(&path, &reg).unwrap());

        let held = SlotLock::try_acquire(&path, &reg).unwrap().expect("lock");
        assert!(probe_held(&path, &reg).unwrap());
        assert!(probe_held(&path, &LockRegistry::new()).unwrap());

        drop(held);
        assert!(!probe_held(&path, &reg).unwrap());
    }

    #[test]
    fn stale_entries_are_removed_live_ones_kept() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("lock.term.file0");
        let live = dir.path().join("lock.term.file1");
        std::fs::write(&stale, b"").unwrap();

        let _held = SlotLock::try_acquire(&live, &private()).unwrap().expect("lock");
        let reg = LockRegistry::new();

        assert!(remove_if_stale(&stale, &reg).unwrap());
        assert!(!stale.exists());
        assert!(!remove_if_stale(&live, &reg).unwrap());
        assert!(live.exists());
        assert!(!remove_if_stale(&stale, &reg).unwrap());
    }

    #[test]
    fn acquire_survives_a_concurrent_cleaner() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file0");
        let done = Arc::new(AtomicBool::new(false));

        let cleaner = {
            let path = path.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let other_process = LockRegistry::new();
                while !done.load(Ordering::Relaxed) {
                    remove_if_stale(&path, &other_process).unwrap();
                    std::thread::yield_now();
                }
            })
        };

        let reg = private();
        for i in 0..200 {
            let lock = SlotLock::try_acquire(&path, &reg).unwrap();
            assert!(lock.is_some(), "acquire {i} reported contention with nobody holding");
        }

        done.store(true, Ordering::Relaxed);
        cleaner.join().unwrap();
    }

    #[test]
    fn release_and_remove_deletes_both_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.term.file3");
        let signal = dir.path().join("term.file3");
        let reg = private();

        let lock = SlotLock::try_acquire(&path, &reg).unwrap().expect("lock");
        std::fs::write(&signal, b"").unwrap();
        lock.release_and_remove(&signal).unwrap();

        assert!(!path.exists());
        assert!(!signal.exists());
        assert!(reg.is_empty());
    }
}
