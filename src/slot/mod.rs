// src/slot/mod.rs

//! Slot IDs and the names of the entries that represent them on disk.
//!
//! A slot `<id>` lives in the coordination directory as:
//! - `lock.term.file<id>`: held under an exclusive advisory lock by the run task,
//! - `term.file<id>`: created by a stop task to ask the run task to exit.
//!
//! The last allocated ID is additionally persisted in `last.term.id` so that
//! allocation never depends on filesystem timestamps.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::errors::{Error, Result};

pub const LOCK_PREFIX: &str = "lock.term.file";
pub const SIGNAL_PREFIX: &str = "term.file";
pub const COUNTER_FILE: &str = "last.term.id";
/// Serialises counter updates. Never deleted.
pub const COUNTER_LOCK_FILE: &str = "last.term.id.lock";
pub const DEFAULT_DIR_NAME: &str = "termination";

/// Suffix of the counter's temporary files (`last.term.id.<random>.tmp`).
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// Identifier of a coordination slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u64);

impl SlotId {
    pub fn next(self) -> SlotId {
        SlotId(self.0.saturating_add(1))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a file name in the coordination directory stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEntry {
    Lock(SlotId),
    Signal(SlotId),
    Counter,
}

impl SlotEntry {
    /// Classify a bare file name. Anything unrecognised yields `None`.
    pub fn parse(file_name: &str) -> Option<SlotEntry> {
        if file_name == COUNTER_FILE {
            return Some(SlotEntry::Counter);
        }
        if let Some(rest) = file_name.strip_prefix(LOCK_PREFIX) {
            return parse_id(rest).map(SlotEntry::Lock);
        }
        if let Some(rest) = file_name.strip_prefix(SIGNAL_PREFIX) {
            return parse_id(rest).map(SlotEntry::Signal);
        }
        None
    }
}

/// Digits only: `u64::from_str` would also accept a leading `+`.
fn parse_id(digits: &str) -> Option<SlotId> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().map(SlotId)
}

pub fn lock_file_name(id: SlotId) -> String {
    format!("{LOCK_PREFIX}{id}")
}

pub fn signal_file_name(id: SlotId) -> String {
    format!("{SIGNAL_PREFIX}{id}")
}

/// Both on-disk entries of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPaths {
    pub lock: PathBuf,
    pub signal: PathBuf,
}

impl SlotPaths {
    pub fn new(dir: &Path, id: SlotId) -> Self {
        Self {
            lock: dir.join(lock_file_name(id)),
            signal: dir.join(signal_file_name(id)),
        }
    }
}

/// Read the persisted last-allocated ID.
///
/// A missing file means nothing was allocated yet. A corrupt file is logged
/// and treated the same way; live lock entries still keep allocation safe.
pub fn read_counter(dir: &Path) -> Result<Option<SlotId>> {
    let path = dir.join(COUNTER_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(format!("reading {}", path.display()), e)),
    };

    match parse_id(contents.trim()) {
        Some(id) => Ok(Some(id)),
        None => {
            warn!(path = %path.display(), "ignoring unparseable slot counter");
            Ok(None)
        }
    }
}

/// Raise the persisted counter to `id` (never lowers it).
///
/// The read-compare-write runs under an exclusive lock on
/// `last.term.id.lock`, so concurrent runs (threads or processes) serialise.
/// The new value goes through a uniquely named temp file that is renamed
/// into place, so readers never observe a half-written value.
pub fn bump_counter(dir: &Path, id: SlotId) -> Result<()> {
    let lock_path = dir.join(COUNTER_LOCK_FILE);
    let guard = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| Error::io(format!("opening {}", lock_path.display()), e))?;
    FileExt::lock_exclusive(&guard)
        .map_err(|e| Error::io(format!("locking {}", lock_path.display()), e))?;

    let result = raise_counter_locked(dir, id);

    if let Err(e) = FileExt::unlock(&guard) {
        warn!(path = %lock_path.display(), error = %e, "failed to unlock slot counter");
    }
    result
}

fn raise_counter_locked(dir: &Path, id: SlotId) -> Result<()> {
    if let Some(current) = read_counter(dir)? {
        if current >= id {
            return Ok(());
        }
    }

    let path = dir.join(COUNTER_FILE);
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{COUNTER_FILE}."))
        .suffix(TMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| Error::io(format!("creating counter temp file in {}", dir.display()), e))?;

    writeln!(tmp, "{id}")
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::io(format!("writing {}", tmp.path().display()), e))?;

    tmp.persist(&path)
        .map_err(|e| Error::io(format!("renaming counter into {}", path.display()), e.error))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn classifies_entry_names() {
        assert_eq!(SlotEntry::parse("lock.term.file0"), Some(SlotEntry::Lock(SlotId(0))));
        assert_eq!(SlotEntry::parse("lock.term.file12"), Some(SlotEntry::Lock(SlotId(12))));
        assert_eq!(SlotEntry::parse("term.file7"), Some(SlotEntry::Signal(SlotId(7))));
        assert_eq!(SlotEntry::parse("last.term.id"), Some(SlotEntry::Counter));
    }

    #[test]
    fn rejects_foreign_names() {
        for name in [
            "lock.term.file",
            "term.file",
            "term.file+1",
            "term.file-1",
            "lock.term.file1a",
            "term.file 3",
            "README",
            "last.term.id.4242.tmp",
            "last.term.id.lock",
        ] {
            assert_eq!(SlotEntry::parse(name), None, "{name}");
        }
    }

    #[test]
    fn ids_order_numerically() {
        assert!(SlotId(10) > SlotId(9));
        assert_eq!(SlotId(4).next(), SlotId(5));
        assert_eq!(SlotId(u64::MAX).next(), SlotId(u64::MAX));
    }

    #[test]
    fn slot_paths_use_fixed_prefixes() {
        let paths = SlotPaths::new(Path::new("/tmp/termination"), SlotId(2));
        assert_eq!(paths.lock, PathBuf::from("/tmp/termination/lock.term.file2"));
        assert_eq!(paths.signal, PathBuf::from("/tmp/termination/term.file2"));
    }

    #[test]
    fn counter_only_moves_up() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_counter(dir.path()).unwrap(), None);

        bump_counter(dir.path(), SlotId(3)).unwrap();
        assert_eq!(read_counter(dir.path()).unwrap(), Some(SlotId(3)));

        bump_counter(dir.path(), SlotId(1)).unwrap();
        assert_eq!(read_counter(dir.path()).unwrap(), Some(SlotId(3)));

        bump_counter(dir.path(), SlotId(10)).unwrap();
        assert_eq!(read_counter(dir.path()).unwrap(), Some(SlotId(10)));

        let mut leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec![COUNTER_FILE, COUNTER_LOCK_FILE]);
    }

    #[test]
    fn concurrent_bumps_keep_the_highest_value() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = TempDir::new().unwrap();
        let threads = 4u64;

        for round in 0..50u64 {
            let base = round * threads;
            let barrier = Arc::new(Barrier::new(threads as usize));
            let handles: Vec<_> = (1..=threads)
                .map(|k| {
                    let dir = dir.path().to_path_buf();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        bump_counter(&dir, SlotId(base + k))
                    })
                })
                .collect();

            for h in handles {
                h.join().expect("bump thread panicked").unwrap();
            }
            assert_eq!(
                read_counter(dir.path()).unwrap(),
                Some(SlotId(base + threads)),
                "round {round}"
            );
        }

        let temps = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                name.to_string_lossy().ends_with(TMP_SUFFIX)
            })
            .count();
        assert_eq!(temps, 0);
    }

    #[test]
    fn corrupt_counter_reads_as_none() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "garbage\n").unwrap();
        assert_eq!(read_counter(dir.path()).unwrap(), None);
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("term.file0");
        fs::write(&path, b"").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
