//! Minimal pipeline driver for one run-unit
//!
//! [`UnitRunner::run_unit`] ties the pieces together:
//!
//! 1. reconcile the unit's progress with the artifact directories and drop any
//!    id that ended up both processed and skipped
//! 2. classify every candidate item through the [`DedupGate`]
//! 3. produce the remaining items on a bounded worker pool, each call wrapped
//!    in the [`RetryingCaller`]
//! 4. apply outcomes one at a time on the runner task and persist state after
//!    every change
//!
//! If the external service starts refusing requests the run stops early and
//! returns [`Error::Blocked`]. Everything recorded up to that point is on disk.
//!
//! [`UnitRunner::sweep_retention`] applies the configured retention window to
//! the same artifact directory.

mod artifact;


use crate::config::IngestConfig;
use crate::dedup::{Applied, Decision, DedupGate, ItemOutcome};
use crate::error::{Error, Result};
use crate::layout::LayoutResolver;
use crate::metrics::{self, MetricsSink};
use crate::rate_limiter::RateLimiter;
use crate::reconcile::FilesystemReconciler;
use crate::retention::{CleanupReport, RetentionSweeper};
use crate::retry::{ClassifyError, JsonlAuditLog, RetryError, RetryingCaller};
use crate::state::{self, ProgressRecord, SkippedRecord};
use crate::stats::{RunStats, RunStatsSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One candidate item of a run-unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Item id (e.g. video id)
    pub id: String,
    /// Publication date, used by the legacy file naming (defaults to today)
    #[serde(default)]
    pub published: Option<NaiveDate>,
}

impl WorkItem {
    /// Item without a publication date
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            published: None,
        }
    }

    /// Set the publication date
    #[must_use]
    pub fn with_published(mut self, date: NaiveDate) -> Self {
        self.published = Some(date);
        self
    }
}

/// What a producer returned for an item
#[derive(Clone, Debug, PartialEq)]
pub enum Produced {
    /// The primary artifact content, plus metadata for the sidecar
    Content {
        /// Artifact body
        text: String,
        /// Extra sidecar fields
        metadata: Map<String, Value>,
    },
    /// The service answered but has nothing for this item
    Absent {
        /// Producer status, matched against the terminal allowlist
        status: String,
        /// Free-form detail
        reason: String,
    },
}

/// Fetches the primary artifact of an item from the external service
#[async_trait]
pub trait ArtifactProducer: Send + Sync {
    /// Error type of the underlying client
    type Error: ClassifyError + Send + Sync + 'static;

    /// Produce the artifact for `item` of `unit`
    async fn produce(
        &self,
        unit: &str,
        item: &WorkItem,
    ) -> std::result::Result<Produced, Self::Error>;
}

#[async_trait]
impl<T: ArtifactProducer + ?Sized> ArtifactProducer for Arc<T> {
    type Error = T::Error;

    async fn produce(
        &self,
        unit: &str,
        item: &WorkItem,
    ) -> std::result::Result<Produced, Self::Error> {
        (**self).produce(unit, item).await
    }
}

/// Per-item line of a [`UnitReport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemReport {
    /// Item id
    pub item_id: String,
    /// Gate decision before production
    pub decision: Decision,
    /// Outcome, when the item was produced
    pub outcome: Option<ItemOutcome>,
}

/// Result of [`UnitRunner::run_unit`]
#[derive(Clone, Debug)]
pub struct UnitReport {
    /// Run-unit key
    pub unit: String,
    /// Ids added by reconciliation
    pub reconciled_added: Vec<String>,
    /// Orphans dropped by reconciliation
    pub reconciled_removed: Vec<String>,
    /// One entry per candidate item, in input order
    pub items: Vec<ItemReport>,
    /// Runner counters after this unit
    pub stats: RunStatsSnapshot,
}

/// Drives reconciliation, deduplication and production for run-units
pub struct UnitRunner<P> {
    producer: Arc<P>,
    caller: RetryingCaller,
    reconciler: FilesystemReconciler,
    gate: DedupGate,
    resolver: LayoutResolver,
    progress_path: PathBuf,
    skipped_path: PathBuf,
    concurrency: usize,
    retention_days: Option<i64>,
    stats: Arc<RunStats>,
    metrics: Arc<dyn MetricsSink>,
}

impl<P: ArtifactProducer> UnitRunner<P> {
    /// Build a runner for the output root described by `config`
    pub fn new(config: &IngestConfig, producer: P, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        let resolver = LayoutResolver::new(&config.layout)?;

        let mut caller = RetryingCaller::new(config.retry.clone())
            .with_rate_limiter(RateLimiter::new(&config.rate_limit))
            .with_metrics(metrics.clone());
        if let Some(path) = &config.audit_log {
            caller = caller.with_audit(Arc::new(JsonlAuditLog::new(path)));
        }

        let summaries_dir = config.summaries_dir();
        let gate = DedupGate::new(
            resolver.clone(),
            config.skip_policy.clone(),
            config.artifacts_dir(),
            Some(summaries_dir),
            config.force_redownload,
        );

        Ok(Self {
            producer: Arc::new(producer),
            caller,
            reconciler: FilesystemReconciler::new(resolver.clone()),
            gate,
            resolver,
            progress_path: config.progress_path(),
            skipped_path: config.skipped_path(),
            concurrency: config.concurrency,
            retention_days: config.retention.retention_days,
            stats: Arc::new(RunStats::new()),
            metrics,
        })
    }

    /// Counters accumulated across every unit run so far
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Process the candidate `items` of `unit`
    pub async fn run_unit(&self, unit: &str, items: &[WorkItem]) -> Result<UnitReport> {
        let sync = self.reconciler.sync(
            self.gate.artifacts_dir(),
            self.gate.summaries_dir(),
            &self.progress_path,
            unit,
        );
        for e in &sync.scan_errors {
            warn!(
                unit = %unit,
                path = ?e.path,
                error = %e.message,
                "scan error during reconciliation"
            );
        }
        let mut progress: ProgressRecord = sync.record;
        let mut skipped: SkippedRecord = state::load(&self.skipped_path);
        let overlap = self.gate.resolve_overlap(unit, &mut progress, &mut skipped);
        self.persist(unit, None, overlap, &progress, &skipped);

        let mut reports: Vec<ItemReport> = Vec::with_capacity(items.len());
        let mut work = Vec::new();
        for item in items {
            self.stats.record_considered();
            if !self.resolver.is_item_id(&item.id) {
                warn!(unit = %unit, item_id = %item.id, "malformed item id, skipping");
                self.stats.record_error();
                reports.push(ItemReport {
                    item_id: item.id.clone(),
                    decision: Decision::Process { heal: false },
                    outcome: Some(ItemOutcome::Error {
                        message: "malformed item id".to_string(),
                    }),
                });
                continue;
            }

            let decision = self.gate.classify(unit, &item.id, &progress, &skipped);
            match &decision {
                Decision::AlreadyProcessed => self.stats.record_skipped_existing(),
                Decision::SupersededByDerived => self.stats.record_skipped_derived(),
                Decision::PreviouslySkipped(_) => self.stats.record_skipped_previously(),
                Decision::Process { .. } => work.push((reports.len(), item.clone())),
            }
            reports.push(ItemReport {
                item_id: item.id.clone(),
                decision,
                outcome: None,
            });
        }

        debug!(unit = %unit, candidates = items.len(), to_process = work.len(), "unit classified");

        let mut results = futures::stream::iter(work)
            .map(|(index, item)| async move {
                let result = self.produce(unit, &item).await;
                (index, item, result)
            })
            .buffer_unordered(self.concurrency);

        let mut blocked = None;
        while let Some((index, item, result)) = results.next().await {
            let heal = matches!(reports[index].decision, Decision::Process { heal: true });
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) if e.is_blocked() => {
                    self.stats.record_blocked();
                    blocked = Some(e.to_string());
                    ItemOutcome::Error {
                        message: e.to_string(),
                    }
                }
                Err(e) => ItemOutcome::Error {
                    message: e.to_string(),
                },
            };

            match &outcome {
                ItemOutcome::Processed => {
                    self.stats.record_downloaded();
                    if heal {
                        self.stats.record_healed();
                    }
                }
                ItemOutcome::SkippedExpected { status, .. } => {
                    info!(
                        unit = %unit,
                        item_id = %item.id,
                        status = %status,
                        "item has no content, recording skip"
                    );
                    self.stats.record_unavailable();
                    // The unhealthy artifact would otherwise be reconciled back
                    // into progress on the next run
                    if heal && !self.gate.discard_primary(&item.id) {
                        warn!(unit = %unit, item_id = %item.id, "stale artifact left on disk");
                    }
                }
                ItemOutcome::Error { message } => {
                    warn!(
                        unit = %unit,
                        item_id = %item.id,
                        error = %message,
                        "item failed, will retry next run"
                    );
                    self.stats.record_error();
                }
            }

            self.apply(unit, &item.id, &outcome, &mut progress, &mut skipped);
            reports[index].outcome = Some(outcome);

            if blocked.is_some() {
                break;
            }
        }
        // In-flight productions are cancelled here
        drop(results);

        if let Some(message) = blocked {
            error!(
                unit = %unit,
                error = %message,
                "external service blocked requests, aborting unit"
            );
            return Err(Error::Blocked {
                unit: unit.to_string(),
                message,
            });
        }

        let stats = self.stats.snapshot();
        info!(
            unit = %unit,
            considered = items.len(),
            downloaded = stats.downloaded,
            skipped = stats.skipped_total(),
            errors = stats.errors,
            "unit complete"
        );

        Ok(UnitReport {
            unit: unit.to_string(),
            reconciled_added: sync.added,
            reconciled_removed: sync.removed,
            items: reports,
            stats,
        })
    }

    /// Delete artifacts older than the configured retention window
    ///
    /// A no-op when `retention_days` is unset. Progress is left alone; the next
    /// [`run_unit`](Self::run_unit) reconciles the deleted ids away.
    pub fn sweep_retention(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        RetentionSweeper::new()
            .with_resolver(self.resolver.clone())
            .with_metrics(self.metrics.clone())
            .cleanup(self.gate.artifacts_dir(), self.retention_days, now)
    }

    /// Produce one item and write its artifact
    ///
    /// Only service failures are returned as errors; everything else is folded
    /// into the outcome.
    async fn produce(
        &self,
        unit: &str,
        item: &WorkItem,
    ) -> std::result::Result<ItemOutcome, RetryError<P::Error>> {
        let producer = &*self.producer;
        let produced = self
            .caller
            .call("produce", move || producer.produce(unit, item))
            .await?;

        match produced {
            Produced::Content { text, metadata } => {
                let date = item.published.unwrap_or_else(|| Utc::now().date_naive());
                let mut paths = self.resolver.resolve(
                    self.gate.artifacts_dir(),
                    self.gate.summaries_dir(),
                    unit,
                    &item.id,
                    date,
                );
                // Heal in place instead of leaving a second copy under another date
                let existing = self
                    .resolver
                    .find_primary(self.gate.artifacts_dir(), &item.id);
                if let Some(existing) = existing
                    && let Some(meta) = self
                        .resolver
                        .meta_candidates(&existing, &item.id)
                        .into_iter()
                        .next()
                {
                    paths.primary = existing;
                    paths.meta = meta;
                }
                match artifact::write_artifact(&paths, unit, &item.id, &text, &metadata) {
                    Ok(()) => Ok(ItemOutcome::Processed),
                    Err(e) => {
                        error!(
                            unit = %unit,
                            item_id = %item.id,
                            path = ?paths.primary,
                            error = %e,
                            "failed to write artifact"
                        );
                        self.count_error("write_failed");
                        Ok(ItemOutcome::Error {
                            message: format!("failed to write artifact: {e}"),
                        })
                    }
                }
            }
            Produced::Absent { status, reason } => {
                let outcome = self.gate.outcome_for_absent(&status, &reason);
                if matches!(outcome, ItemOutcome::Error { .. }) {
                    self.count_error("absent_not_terminal");
                }
                Ok(outcome)
            }
        }
    }

    /// Record an outcome and persist whichever records changed
    fn apply(
        &self,
        unit: &str,
        item_id: &str,
        outcome: &ItemOutcome,
        progress: &mut ProgressRecord,
        skipped: &mut SkippedRecord,
    ) {
        let applied = self
            .gate
            .apply_outcome(unit, item_id, outcome, progress, skipped, Utc::now());
        self.persist(unit, Some(item_id), applied, progress, skipped);
    }

    /// Save whichever records `applied` marks as changed
    ///
    /// Progress goes first. An id left in both files by a crash in between is
    /// settled by [`DedupGate::resolve_overlap`] at the start of the next run.
    fn persist(
        &self,
        unit: &str,
        item_id: Option<&str>,
        applied: Applied,
        progress: &ProgressRecord,
        skipped: &SkippedRecord,
    ) {
        if applied.progress_changed && !state::save(&self.progress_path, progress, true) {
            warn!(
                unit = %unit,
                item_id = ?item_id,
                "progress not persisted, reconciliation will recover it"
            );
        }
        if applied.skipped_changed && !state::save(&self.skipped_path, skipped, true) {
            warn!(unit = %unit, item_id = ?item_id, "skip record not persisted");
        }
    }

    fn count_error(&self, error_type: &str) {
        self.metrics.counter(
            metrics::PIPELINE_ERRORS_TOTAL,
            1,
            &[("operation", "produce"), ("error_type", error_type)],
        );
    }
}
