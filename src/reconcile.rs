//! Progress reconciliation against on-disk artifacts
//!
//! The persisted progress record and the artifact directories can disagree after
//! a crash, a manual cleanup or a retention sweep. [`FilesystemReconciler::sync`]
//! treats the files as the truth for one run-unit:
//!
//! - recorded ids without any artifact are dropped (orphans)
//! - artifacts that were never recorded are added
//!
//! Scans are sorted, so repeated syncs of an unchanged tree persist identical
//! bytes. Scan errors are collected in the report and never abort the sync.

use crate::evidence::{sidecar_owner, validate_derived};
use crate::layout::LayoutResolver;
use crate::state::{self, ProgressRecord};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A directory or entry that could not be scanned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanError {
    /// Path that failed
    pub path: PathBuf,
    /// What went wrong
    pub message: String,
}

/// Outcome of one [`FilesystemReconciler::sync`]
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    /// Progress record after reconciliation
    pub record: ProgressRecord,
    /// Ids newly recorded for the unit, sorted
    pub added: Vec<String>,
    /// Orphaned ids dropped from the unit, sorted
    pub removed: Vec<String>,
    /// Errors met while scanning
    pub scan_errors: Vec<ScanError>,
    /// Whether the record changed and was written
    pub saved: bool,
}

impl SyncReport {
    /// Whether the unit's id set changed
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Recomputes authoritative progress from state and artifact evidence
#[derive(Clone, Debug)]
pub struct FilesystemReconciler {
    resolver: LayoutResolver,
}

impl FilesystemReconciler {
    /// Create a reconciler using `resolver` to recognize artifacts
    pub fn new(resolver: LayoutResolver) -> Self {
        Self { resolver }
    }

    /// Reconcile the progress of `unit_key` stored at `state_path`
    pub fn sync(
        &self,
        artifacts_dir: &Path,
        summaries_dir: Option<&Path>,
        state_path: &Path,
        unit_key: &str,
    ) -> SyncReport {
        let mut record: ProgressRecord = state::load(state_path);
        let mut scan_errors = Vec::new();

        let mut discovered = self.scan_primary(artifacts_dir, unit_key, &mut scan_errors);
        if let Some(dir) = summaries_dir {
            discovered.extend(self.scan_derived(dir, unit_key, &mut scan_errors));
        }

        let previous = record.items(unit_key).cloned().unwrap_or_default();
        let kept: BTreeSet<String> = previous.intersection(&discovered).cloned().collect();
        let new_set: BTreeSet<String> = kept.union(&discovered).cloned().collect();

        let added: Vec<String> = new_set.difference(&previous).cloned().collect();
        let removed: Vec<String> = previous.difference(&new_set).cloned().collect();

        let mut saved = false;
        if new_set != previous {
            record.set_unit(unit_key, new_set);
            saved = state::save(state_path, &record, true);
            if saved {
                info!(
                    unit = %unit_key,
                    added = added.len(),
                    removed = removed.len(),
                    "progress reconciled with filesystem"
                );
            } else {
                warn!(unit = %unit_key, "reconciled progress could not be persisted");
            }
        } else {
            debug!(unit = %unit_key, "progress already consistent with filesystem");
        }

        SyncReport {
            record,
            added,
            removed,
            scan_errors,
            saved,
        }
    }

    fn scan_primary(
        &self,
        dir: &Path,
        unit_key: &str,
        errors: &mut Vec<ScanError>,
    ) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for path in sorted_files(dir, errors) {
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.resolver.parse_primary(n))
            else {
                continue;
            };

            if let Some(owner) = sidecar_owner(&self.resolver, &path, &id)
                && owner != unit_key
            {
                debug!(
                    item_id = %id,
                    owner = %owner,
                    unit = %unit_key,
                    "artifact belongs to another unit"
                );
                continue;
            }
            ids.insert(id);
        }
        ids
    }

    fn scan_derived(
        &self,
        dir: &Path,
        unit_key: &str,
        errors: &mut Vec<ScanError>,
    ) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for path in sorted_files(dir, errors) {
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.resolver.parse_derived(n))
            else {
                continue;
            };

            match validate_derived(&path, &id) {
                Ok(info) => {
                    if let Some(owner) = info.owner
                        && owner != unit_key
                    {
                        continue;
                    }
                    ids.insert(id);
                }
                Err(reason) => {
                    debug!(
                        item_id = %id,
                        path = ?path,
                        reason = %reason,
                        "ignoring invalid derived artifact"
                    );
                }
            }
        }
        ids
    }
}

/// Regular files directly inside `dir`, sorted by path
///
/// A missing directory is simply empty.
fn sorted_files(dir: &Path, errors: &mut Vec<ScanError>) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = ?dir, error = %e, "failed to scan artifact directory");
            errors.push(ScanError {
                path: dir.to_path_buf(),
                message: e.to_string(),
            });
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        match entry.and_then(|e| e.file_type().map(|t| (e.path(), t))) {
            Ok((path, file_type)) if file_type.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => {
                warn!(path = ?dir, error = %e, "failed to read directory entry");
                errors.push(ScanError {
                    path: dir.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
    }
    files.sort();
    files
}
