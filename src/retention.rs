//! Time-based retention sweep for aged artifacts
//!
//! Best effort throughout: a file or directory that cannot be removed is logged
//! and counted, and the sweep carries on.

use crate::error::{Error, Result};
use crate::layout::LayoutResolver;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What happened to one entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepResult {
    /// Removed
    Deleted,
    /// Younger than the cutoff, or not a regular file
    Kept,
    /// Could not be inspected or removed
    Failed(String),
}

/// Aggregated outcome of [`RetentionSweeper::cleanup`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files removed
    pub deleted_files: usize,
    /// Directories removed because the sweep emptied them
    pub deleted_dirs: usize,
    /// Files left in place
    pub kept_files: usize,
    /// Entries that could not be inspected or removed
    pub failures: usize,
    /// Item ids whose primary artifacts were removed, sorted
    pub deleted_item_ids: Vec<String>,
}

impl CleanupReport {
    fn tally(&mut self, result: &SweepResult) {
        match result {
            SweepResult::Deleted => self.deleted_files += 1,
            SweepResult::Kept => self.kept_files += 1,
            SweepResult::Failed(_) => self.failures += 1,
        }
    }
}

/// Deletes files older than a retention window
#[derive(Clone)]
pub struct RetentionSweeper {
    resolver: Option<LayoutResolver>,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for RetentionSweeper {
    fn default() -> Self {
        Self::new()
    }
}

impl RetentionSweeper {
    /// Sweeper without item attribution or metrics
    pub fn new() -> Self {
        Self {
            resolver: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Attribute deleted primary artifacts to item ids
    #[must_use]
    pub fn with_resolver(mut self, resolver: LayoutResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Report deletion counts to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Remove files under `root` last modified strictly before
    /// `now - retention_days`, then prune the directories that emptied
    ///
    /// `None` disables the sweep. A negative window is a configuration error.
    /// `root` itself is never removed.
    pub fn cleanup(
        &self,
        root: &Path,
        retention_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let Some(days) = retention_days else {
            debug!(?root, "retention disabled, skipping cleanup");
            return Ok(CleanupReport::default());
        };
        if days < 0 {
            return Err(Error::config(
                "retention_days",
                format!("must be >= 0 or null, got {days}"),
            ));
        }
        let window = TimeDelta::try_days(days).ok_or_else(|| {
            Error::config("retention_days", format!("{days} days is out of range"))
        })?;
        let cutoff = now - window;

        let mut report = CleanupReport::default();
        if !root.is_dir() {
            debug!(?root, "retention root does not exist, skipping cleanup");
            return Ok(report);
        }

        // Pass 1: aged files
        let mut touched_dirs = BTreeSet::new();
        let mut item_ids = BTreeSet::new();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(?root, error = %e, "failed to read entry during retention sweep");
                    report.tally(&SweepResult::Failed(e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let result = sweep_file(path, cutoff);
            if result == SweepResult::Deleted {
                touched_dirs.extend(ancestors_below(path, root));
                if let Some(id) = self.resolver.as_ref().and_then(|r| r.item_id_of(path)) {
                    item_ids.insert(id);
                }
            }
            report.tally(&result);
        }

        // Pass 2: directories emptied by pass 1, deepest first
        for dir in touched_dirs.iter().rev() {
            match prune_if_empty(dir) {
                Ok(true) => {
                    debug!(?dir, "pruned empty directory");
                    report.deleted_dirs += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(?dir, error = %e, "failed to prune directory");
                    report.failures += 1;
                }
            }
        }

        report.deleted_item_ids = item_ids.into_iter().collect();

        self.metrics.counter(
            metrics::RETENTION_DELETED_FILES,
            report.deleted_files as u64,
            &[],
        );
        self.metrics.counter(
            metrics::RETENTION_DELETED_DIRS,
            report.deleted_dirs as u64,
            &[],
        );
        info!(
            ?root,
            retention_days = days,
            deleted_files = report.deleted_files,
            deleted_dirs = report.deleted_dirs,
            failures = report.failures,
            "retention cleanup complete"
        );

        Ok(report)
    }
}

fn sweep_file(path: &Path, cutoff: DateTime<Utc>) -> SweepResult {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified),
        Err(e) => {
            warn!(?path, error = %e, "failed to read modification time");
            return SweepResult::Failed(e.to_string());
        }
    };
    if modified >= cutoff {
        return SweepResult::Kept;
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(?path, %modified, "deleted aged file");
            SweepResult::Deleted
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to delete file");
            SweepResult::Failed(e.to_string())
        }
    }
}

/// Directories between `path` and `root`, excluding `root`
fn ancestors_below(path: &Path, root: &Path) -> Vec<PathBuf> {
    path.ancestors()
        .skip(1)
        .take_while(|dir| *dir != root && dir.starts_with(root))
        .map(Path::to_path_buf)
        .collect()
}

fn prune_if_empty(dir: &Path) -> std::io::Result<bool> {
    if std::fs::read_dir(dir)?.next().is_some() {
        return Ok(false);
    }
    std::fs::remove_dir(dir)?;
    Ok(true)
}
