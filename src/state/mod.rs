//! Crash-safe persistence of small JSON state records
//!
//! [`save`] keeps a `<stem>.bak` copy of the previous version and replaces the
//! file atomically. [`load`] never fails: a corrupt file is quarantined as
//! `<stem>.corrupted.<unix_ts>.json` (bytes untouched) and the backup is restored
//! in its place, falling back to an empty record when nothing usable is left.
//!
//! This module is the only writer of state files. Callers must ensure a single
//! writer per output root.

mod atomic;
mod records;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use atomic::write_atomic;
pub use records::{ProgressRecord, SkipEntry, SkippedRecord, StateRecord};

use crate::error::StateError;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Backup sibling of a state file: `<stem>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}.bak", file_stem(path)))
}

/// Quarantine name for a corrupt state file: `<stem>.corrupted.<unix_ts>.json`
pub fn quarantine_path(path: &Path, unix_ts: i64) -> PathBuf {
    path.with_file_name(format!("{}.corrupted.{}.json", file_stem(path), unix_ts))
}

/// Load a state record, recovering from corruption
///
/// - missing file and no backup: empty record
/// - unparsable or wrongly shaped file: quarantined, then the backup is tried
/// - usable backup: returned, and the primary file is rewritten to match it
/// - nothing usable: empty record
pub fn load<R: StateRecord>(path: &Path) -> R {
    let rewrite = match read_record::<R>(path) {
        Ok(Some(record)) => return record,
        Ok(None) => {
            debug!(kind = R::KIND, path = ?path, "state file missing");
            true
        }
        Err(e) => {
            warn!(kind = R::KIND, error = %e, "state file unusable, quarantining");
            // Never overwrite bytes that could not be moved aside
            quarantine(path).is_some()
        }
    };

    restore_from_backup(path, rewrite).unwrap_or_default()
}

/// Atomically persist a state record
///
/// With `create_backup`, an existing file is first copied to its `.bak` sibling.
/// Returns `false` (after logging) if anything failed; the previous file is then
/// still intact.
pub fn save<R: StateRecord>(path: &Path, record: &R, create_backup: bool) -> bool {
    match try_save(path, record, create_backup) {
        Ok(()) => {
            debug!(kind = R::KIND, path = ?path, "state saved");
            true
        }
        Err(e) => {
            error!(kind = R::KIND, error = %e, "failed to save state");
            false
        }
    }
}

fn try_save<R: StateRecord>(
    path: &Path,
    record: &R,
    create_backup: bool,
) -> Result<(), StateError> {
    let write_failed = |e: &dyn std::fmt::Display| StateError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut bytes = serde_json::to_vec_pretty(record).map_err(|e| write_failed(&e))?;
    bytes.push(b'\n');

    if create_backup {
        match std::fs::read(path) {
            Ok(current) => {
                write_atomic(&backup_path(path), &current).map_err(|e| write_failed(&e))?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_failed(&e)),
        }
    }

    write_atomic(path, &bytes).map_err(|e| write_failed(&e))
}

/// Read and decode `path`; `Ok(None)` when it does not exist
fn read_record<R: StateRecord>(path: &Path) -> Result<Option<R>, StateError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StateError::Corrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| StateError::InvalidShape {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn restore_from_backup<R: StateRecord>(path: &Path, rewrite: bool) -> Option<R> {
    let backup = backup_path(path);
    let record = match read_record::<R>(&backup) {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            warn!(kind = R::KIND, error = %e, "backup state file unusable, starting empty");
            return None;
        }
    };

    if !rewrite {
        warn!(kind = R::KIND, path = ?path, "using backup state without rewriting primary");
    } else if save(path, &record, false) {
        info!(kind = R::KIND, path = ?path, backup = ?backup, "state restored from backup");
    } else {
        warn!(
            kind = R::KIND,
            path = ?path,
            "state restored from backup but primary could not be rewritten"
        );
    }
    Some(record)
}

fn quarantine(path: &Path) -> Option<PathBuf> {
    let ts = chrono::Utc::now().timestamp();
    let mut target = quarantine_path(path, ts);
    let mut n = 1;
    while target.exists() {
        target = path.with_file_name(format!("{}.corrupted.{}.{}.json", file_stem(path), ts, n));
        n += 1;
    }

    match std::fs::rename(path, &target) {
        Ok(()) => {
            warn!(path = ?path, quarantined = ?target, "corrupt state file quarantined");
            Some(target)
        }
        Err(e) => {
            error!(path = ?path, error = %e, "failed to quarantine corrupt state file");
            None
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string())
}
