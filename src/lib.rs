//! # resumable-ingest
//!
//! Resumable-ingestion state and retry for long-running jobs that pull items
//! from a rate-limited external service and write one artifact per item.
//!
//! ## Design Philosophy
//!
//! resumable-ingest is designed to be:
//! - **Crash safe** - State files are written atomically and restored from a
//!   backup when corrupted
//! - **Filesystem first** - Artifacts on disk are the source of truth; progress
//!   records are reconciled against them before every unit
//! - **Polite** - Every external call is spaced, classified and retried with
//!   capped exponential backoff
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use resumable_ingest::{
//!     ArtifactProducer, IngestConfig, NoopMetrics, Produced, UnitRunner, WorkItem,
//! };
//! use std::sync::Arc;
//!
//! struct Fetcher;
//!
//! #[async_trait]
//! impl ArtifactProducer for Fetcher {
//!     type Error = std::io::Error;
//!
//!     async fn produce(&self, _unit: &str, item: &WorkItem) -> Result<Produced, std::io::Error> {
//!         Ok(Produced::Content {
//!             text: format!("transcript of {}", item.id),
//!             metadata: Default::default(),
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::default();
//!     let runner = UnitRunner::new(&config, Fetcher, Arc::new(NoopMetrics))?;
//!
//!     let report = runner
//!         .run_unit("UC_channel", &[WorkItem::new("dQw4w9WgXcQ")])
//!         .await?;
//!     println!("downloaded {}", report.stats.downloaded);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Deduplication decisions and outcome recording
pub mod dedup;
/// Error types
pub mod error;
/// Artifact health and derived-artifact validation
pub mod evidence;
/// Artifact naming
pub mod layout;
/// Metric names and sinks
pub mod metrics;
/// Shared call spacing
pub mod rate_limiter;
/// Progress reconciliation against the filesystem
pub mod reconcile;
/// Time-based retention sweep
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// Unit pipeline driver
pub mod runner;
/// Crash-safe state records
pub mod state;
/// Per-run counters
pub mod stats;

// Re-export commonly used types
pub use config::{
    IngestConfig, LayoutConfig, RateLimitConfig, RetentionConfig, RetryConfig, SkipPolicyConfig,
};
pub use dedup::{Applied, Decision, DedupGate, ItemOutcome};
pub use error::{Error, Result, StateError};
pub use layout::{ArtifactLayout, ArtifactPaths, LayoutResolver};
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics, TracingMetrics};
pub use rate_limiter::RateLimiter;
pub use reconcile::{FilesystemReconciler, SyncReport};
pub use retention::{CleanupReport, RetentionSweeper};
pub use retry::{
    AuditSink, ClassifyError, Classification, ErrorCategory, Failure, JsonlAuditLog, RetryAfter,
    RetryError, RetryingCaller,
};
pub use runner::{ArtifactProducer, ItemReport, Produced, UnitReport, UnitRunner, WorkItem};
pub use state::{ProgressRecord, SkipEntry, SkippedRecord, StateRecord};
pub use stats::{RunStats, RunStatsSnapshot};
