//! Per-item skip/process decisions
//!
//! After each attempt an item lands in exactly one of three buckets:
//!
//! - **processed**: the primary artifact was written; the id goes into progress
//! - **skipped**: a terminal, allowlisted "no content" status; recorded with its
//!   reason and never retried
//! - **error**: anything else; recorded nowhere so the next run retries it
//!
//! Before an attempt [`DedupGate::classify`] decides whether to run at all.

use crate::config::SkipPolicyConfig;
use crate::evidence::{self, Health};
use crate::layout::LayoutResolver;
use crate::state::{ProgressRecord, SkipEntry, SkippedRecord};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to do with an item before producing it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Recorded or present on disk with a healthy primary artifact
    AlreadyProcessed,
    /// A valid derived artifact exists; the primary is not needed
    SupersededByDerived,
    /// Recorded as a terminal skip
    PreviouslySkipped(SkipEntry),
    /// Produce the item; `heal` is set when a recorded artifact turned out unhealthy
    Process {
        /// Replacing an unhealthy artifact rather than producing a new one
        heal: bool,
    },
}

impl Decision {
    /// Whether the item needs to be produced
    pub fn should_process(&self) -> bool {
        matches!(self, Decision::Process { .. })
    }
}

/// Result of one production attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Primary artifact written
    Processed,
    /// Terminal absence on the allowlist
    SkippedExpected {
        /// Producer status
        status: String,
        /// Producer detail
        reason: String,
    },
    /// Retryable failure; nothing is recorded
    Error {
        /// Failure description
        message: String,
    },
}

/// Which state records an outcome modified
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Applied {
    /// The progress record changed
    pub progress_changed: bool,
    /// The skipped record changed
    pub skipped_changed: bool,
}

/// Consults reconciled state and artifact evidence for one output root
#[derive(Clone, Debug)]
pub struct DedupGate {
    resolver: LayoutResolver,
    skip_policy: SkipPolicyConfig,
    artifacts_dir: PathBuf,
    summaries_dir: Option<PathBuf>,
    force: bool,
}

impl DedupGate {
    /// Create a gate over the given artifact directories
    ///
    /// `force` ignores derived artifacts so primaries are produced again.
    pub fn new(
        resolver: LayoutResolver,
        skip_policy: SkipPolicyConfig,
        artifacts_dir: impl Into<PathBuf>,
        summaries_dir: Option<PathBuf>,
        force: bool,
    ) -> Self {
        Self {
            resolver,
            skip_policy,
            artifacts_dir: artifacts_dir.into(),
            summaries_dir,
            force,
        }
    }

    /// Directory holding primary artifacts
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Directory holding derived artifacts, if configured
    pub fn summaries_dir(&self) -> Option<&Path> {
        self.summaries_dir.as_deref()
    }

    /// Recorded as processed, or a primary artifact exists on disk
    pub fn already_processed(&self, unit: &str, item_id: &str, record: &ProgressRecord) -> bool {
        record.contains(unit, item_id)
            || self
                .resolver
                .find_primary(&self.artifacts_dir, item_id)
                .is_some()
    }

    /// A valid derived artifact exists and `force` is off
    ///
    /// Invalid derived artifacts are quarantined on the way.
    pub fn should_skip_due_to_derived(&self, item_id: &str) -> bool {
        if self.force {
            return false;
        }
        self.summaries_dir
            .as_deref()
            .is_some_and(|dir| evidence::has_valid_derived(&self.resolver, dir, item_id, true))
    }

    /// Allowlisted skip entry recorded for the item
    ///
    /// Entries whose status is no longer on the allowlist are ignored, so the
    /// item gets retried.
    pub fn previously_skipped<'a>(
        &self,
        unit: &str,
        item_id: &str,
        skipped: &'a SkippedRecord,
    ) -> Option<&'a SkipEntry> {
        skipped
            .get(unit, item_id)
            .filter(|entry| self.skip_policy.is_terminal(&entry.status))
    }

    /// Health of the item's primary artifact
    pub fn inspect(&self, item_id: &str) -> Health {
        evidence::inspect_primary(&self.resolver, &self.artifacts_dir, item_id)
    }

    /// Decide whether to produce an item
    pub fn classify(
        &self,
        unit: &str,
        item_id: &str,
        progress: &ProgressRecord,
        skipped: &SkippedRecord,
    ) -> Decision {
        if self.should_skip_due_to_derived(item_id) {
            debug!(unit = %unit, item_id = %item_id, "derived artifact present");
            return Decision::SupersededByDerived;
        }

        if self.already_processed(unit, item_id, progress) {
            let health = self.inspect(item_id);
            if health.is_ok() {
                return Decision::AlreadyProcessed;
            }
            if let Some(entry) = self.previously_skipped(unit, item_id, skipped) {
                debug!(
                    unit = %unit,
                    item_id = %item_id,
                    health = %health,
                    "unhealthy artifact of a skipped item"
                );
                return Decision::PreviouslySkipped(entry.clone());
            }
            info!(
                unit = %unit,
                item_id = %item_id,
                health = %health,
                "recorded artifact unhealthy, healing"
            );
            return Decision::Process { heal: true };
        }

        if let Some(entry) = self.previously_skipped(unit, item_id, skipped) {
            debug!(unit = %unit, item_id = %item_id, status = %entry.status, "previously skipped");
            return Decision::PreviouslySkipped(entry.clone());
        }

        Decision::Process { heal: false }
    }

    /// A healthy primary or a valid derived artifact exists for the item
    pub fn has_evidence(&self, item_id: &str) -> bool {
        self.inspect(item_id).is_ok()
            || self
                .summaries_dir
                .as_deref()
                .is_some_and(|dir| evidence::has_valid_derived(&self.resolver, dir, item_id, false))
    }

    /// Make sure no id of `unit` is both processed and skipped
    ///
    /// An id with evidence on disk stays processed and loses its skip entry;
    /// otherwise the skip wins and the id leaves progress.
    pub fn resolve_overlap(
        &self,
        unit: &str,
        progress: &mut ProgressRecord,
        skipped: &mut SkippedRecord,
    ) -> Applied {
        let (Some(done), Some(skips)) = (progress.items(unit), skipped.items(unit)) else {
            return Applied::default();
        };
        let overlap: Vec<String> = done
            .iter()
            .filter(|id| skips.contains_key(*id))
            .cloned()
            .collect();

        let mut applied = Applied::default();
        for id in overlap {
            if self.has_evidence(&id) {
                debug!(unit = %unit, item_id = %id, "artifact present, dropping skip entry");
                skipped.remove(unit, &id);
                applied.skipped_changed = true;
            } else {
                debug!(unit = %unit, item_id = %id, "no usable artifact, keeping skip entry");
                progress.remove(unit, &id);
                applied.progress_changed = true;
            }
        }
        applied
    }

    /// Remove the primary artifact of an item and its sidecar
    ///
    /// Used when an unhealthy artifact turns out to have no replacement, so
    /// reconciliation does not bring the id back. Returns false if a file could
    /// not be removed.
    pub fn discard_primary(&self, item_id: &str) -> bool {
        let Some(primary) = self.resolver.find_primary(&self.artifacts_dir, item_id) else {
            return true;
        };
        let mut ok = true;
        let sidecars = self.resolver.meta_candidates(&primary, item_id);
        for path in std::iter::once(primary).chain(sidecars) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(item_id = %item_id, path = ?path, "removed stale artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        item_id = %item_id,
                        path = ?path,
                        error = %e,
                        "failed to remove stale artifact"
                    );
                    ok = false;
                }
            }
        }
        ok
    }

    /// Map a producer "no content" status onto the trichotomy
    pub fn outcome_for_absent(&self, status: &str, reason: &str) -> ItemOutcome {
        if self.skip_policy.is_terminal(status) {
            ItemOutcome::SkippedExpected {
                status: status.to_string(),
                reason: reason.to_string(),
            }
        } else {
            ItemOutcome::Error {
                message: format!("{status}: {reason}"),
            }
        }
    }

    /// Record an outcome into the in-memory state records
    ///
    /// Callers persist the records that changed.
    pub fn apply_outcome(
        &self,
        unit: &str,
        item_id: &str,
        outcome: &ItemOutcome,
        progress: &mut ProgressRecord,
        skipped: &mut SkippedRecord,
        now: DateTime<Utc>,
    ) -> Applied {
        match outcome {
            ItemOutcome::Processed => Applied {
                progress_changed: progress.insert(unit, item_id),
                skipped_changed: skipped.remove(unit, item_id).is_some(),
            },
            ItemOutcome::SkippedExpected { status, reason } => {
                skipped.insert(unit, item_id, SkipEntry::new(status, reason, now));
                Applied {
                    progress_changed: progress.remove(unit, item_id),
                    skipped_changed: true,
                }
            }
            ItemOutcome::Error { .. } => Applied::default(),
        }
    }
}
