// src/coordinator/scan.rs

//! Directory scanning and the cleanup pass.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::lock::{self, LockRegistry};
use crate::slot::{self, SlotEntry, SlotId, SlotPaths, COUNTER_FILE, TMP_SUFFIX};

/// Counter temp files younger than this may still be in the middle of a
/// write by another process.
const STALE_TMP_AGE: Duration = Duration::from_secs(60);

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub stale_locks: Vec<SlotId>,
    pub orphan_signals: Vec<SlotId>,
    pub temp_files: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.stale_locks.is_empty() && self.orphan_signals.is_empty() && self.temp_files == 0
    }
}

/// Slot entries found in the coordination directory, sorted by ID.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub locks: Vec<SlotId>,
    pub signals: Vec<SlotId>,
    pub temps: Vec<PathBuf>,
}

/// File names in `dir`. Names that are not UTF-8 cannot be slot entries.
fn entry_names(dir: &Path) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(dir).map_err(|e| Error::io(format!("reading dir {}", dir.display()), e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(format!("reading dir {}", dir.display()), e))?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

pub(crate) fn list(dir: &Path) -> Result<Listing> {
    let mut listing = Listing::default();

    for name in entry_names(dir)? {
        match SlotEntry::parse(&name) {
            Some(SlotEntry::Lock(id)) => listing.locks.push(id),
            Some(SlotEntry::Signal(id)) => listing.signals.push(id),
            Some(SlotEntry::Counter) => {}
            None if is_counter_tmp(&name) => listing.temps.push(dir.join(&name)),
            None => {}
        }
    }

    listing.locks.sort_unstable();
    listing.signals.sort_unstable();
    Ok(listing)
}

fn is_counter_tmp(name: &str) -> bool {
    name.starts_with(COUNTER_FILE) && name.ends_with(TMP_SUFFIX)
}

/// Highest ID among the lock entries in `names`, compared as integers.
pub fn highest_slot_id<I, S>(names: I) -> Option<SlotId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|n| match SlotEntry::parse(n.as_ref()) {
            Some(SlotEntry::Lock(id)) => Some(id),
            _ => None,
        })
        .max()
}

/// Remove stale lock entries, then signal entries whose lock entry is gone,
/// then abandoned counter temp files.
pub fn cleanup(dir: &Path, registry: &LockRegistry) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let listing = list(dir)?;

    for id in listing.locks {
        let paths = SlotPaths::new(dir, id);
        if lock::remove_if_stale(&paths.lock, registry)? {
            debug!(slot = %id, "removed stale lock entry");
            report.stale_locks.push(id);
        }
    }

    for id in listing.signals {
        let paths = SlotPaths::new(dir, id);
        if paths.lock.exists() {
            continue;
        }
        let removed = slot::remove_if_exists(&paths.signal)
            .map_err(|e| Error::io(format!("removing {}", paths.signal.display()), e))?;
        if removed {
            debug!(slot = %id, "removed orphaned signal entry");
            report.orphan_signals.push(id);
        }
    }

    let now = SystemTime::now();
    for tmp in listing.temps {
        let old_enough = fs::metadata(&tmp)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .is_some_and(|age| age >= STALE_TMP_AGE);
        if old_enough && slot::remove_if_exists(&tmp).unwrap_or(false) {
            report.temp_files += 1;
        }
    }

    if !report.is_empty() {
        info!(
            dir = %dir.display(),
            stale_locks = report.stale_locks.len(),
            orphan_signals = report.orphan_signals.len(),
            "cleaned up abandoned slots"
        );
    }

    Ok(report)
}

/// Highest ID among the lock entries currently on disk.
pub fn last_lock_id(dir: &Path) -> Result<Option<SlotId>> {
    Ok(highest_slot_id(entry_names(dir)?))
}

/// IDs of the lock entries currently on disk.
pub(crate) fn lock_ids(dir: &Path) -> Result<Vec<SlotId>> {
    Ok(list(dir)?.locks)
}

/// IDs whose lock entry is actually held right now.
pub fn active_slots(dir: &Path, registry: &LockRegistry) -> Result<Vec<SlotId>> {
    let mut active = Vec::new();
    for id in lock_ids(dir)? {
        if lock::probe_held(&SlotPaths::new(dir, id).lock, registry)? {
            active.push(id);
        }
    }
    Ok(active)
}
