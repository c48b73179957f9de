//! Configuration types for resumable-ingest
//!
//! Every struct deserializes with sensible defaults so an empty JSON object is a
//! valid configuration. Durations are serialized as (fractional) seconds.

use crate::error::{Error, Result};
use crate::layout::ArtifactLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for one external call site
///
/// Total attempts are `max_retries + 1`. Without a server wait hint the sleep
/// before attempt `n + 1` is `min(backoff_cap, backoff_base^(n-1)) + uniform(0, jitter_max)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff base in seconds (default: 2.0)
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Upper bound for any single computed sleep (default: 60 seconds)
    #[serde(default = "default_backoff_cap", with = "duration_secs")]
    pub backoff_cap: Duration,

    /// Maximum uniform jitter added to a computed backoff (default: 1 second)
    #[serde(default = "default_jitter_max", with = "duration_secs")]
    pub jitter_max: Duration,

    /// HTTP status codes worth retrying (default: 429, 500, 502, 503, 504)
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            jitter_max: default_jitter_max(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Total number of attempts, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether an explicit status code should be retried
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    fn validate(&self) -> Result<()> {
        if !self.backoff_base.is_finite() || self.backoff_base <= 0.0 {
            return Err(Error::config(
                "retry.backoff_base",
                format!("must be a positive number, got {}", self.backoff_base),
            ));
        }
        Ok(())
    }
}

/// Spacing between consecutive calls to the same external service
///
/// Shared by every worker; see [`RateLimiter`](crate::rate_limiter::RateLimiter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum delay between two calls (default: 0)
    #[serde(default, with = "duration_secs")]
    pub min_delay: Duration,

    /// Uniform jitter added on top of `min_delay` (default: 1 second)
    #[serde(default = "default_rate_jitter", with = "duration_secs")]
    pub jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::ZERO,
            jitter: default_rate_jitter(),
        }
    }
}

/// Retention window for aged artifacts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Files older than this many days are deleted (default: 30, null disables)
    #[serde(default = "default_retention_days")]
    pub retention_days: Option<i64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<()> {
        match self.retention_days {
            Some(days) if days < 0 => Err(Error::config(
                "retention.retention_days",
                format!("must be >= 0 or null, got {days}"),
            )),
            _ => Ok(()),
        }
    }
}

/// On-disk naming of primary, derived and sidecar artifacts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Which naming convention new artifacts are written with (default: canonical)
    #[serde(default)]
    pub layout: ArtifactLayout,

    /// Extension of primary artifacts, without the dot (default: "txt")
    #[serde(default = "default_primary_extension")]
    pub primary_extension: String,

    /// Regex matching a bare item id (default: 11-character video id)
    #[serde(default = "default_item_id_pattern")]
    pub item_id_pattern: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            layout: ArtifactLayout::default(),
            primary_extension: default_primary_extension(),
            item_id_pattern: default_item_id_pattern(),
        }
    }
}

impl LayoutConfig {
    fn validate(&self) -> Result<()> {
        let ext = self.primary_extension.trim();
        if ext.is_empty() || ext.contains('.') || ext.contains('/') {
            return Err(Error::config(
                "layout.primary_extension",
                format!(
                    "must be a bare extension such as \"txt\", got {:?}",
                    self.primary_extension
                ),
            ));
        }
        if let Err(e) = regex::Regex::new(&self.item_id_pattern) {
            return Err(Error::config(
                "layout.item_id_pattern",
                format!("invalid regex: {e}"),
            ));
        }
        Ok(())
    }
}

/// Which "no content" outcomes are terminal
///
/// Only statuses in this allowlist are recorded as expected skips. Everything else
/// an artifact producer reports stays retryable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicyConfig {
    /// Terminal statuses (default: "no_transcript", "transcripts_disabled")
    #[serde(default = "default_terminal_statuses")]
    pub terminal_statuses: Vec<String>,
}

impl Default for SkipPolicyConfig {
    fn default() -> Self {
        Self {
            terminal_statuses: default_terminal_statuses(),
        }
    }
}

impl SkipPolicyConfig {
    /// Whether a producer status is a terminal, never-retried absence
    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal_statuses.iter().any(|s| s == status)
    }

    fn validate(&self) -> Result<()> {
        if self.terminal_statuses.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::config(
                "skip_policy.terminal_statuses",
                "statuses must be non-empty strings",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for an ingestion output root
///
/// Paths not set explicitly are derived from `output_root` and the artifact
/// layout (see the accessor methods).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root directory all outputs live under (default: "./output")
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Override for the primary artifact directory
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,

    /// Override for the derived artifact directory
    #[serde(default)]
    pub summaries_dir: Option<PathBuf>,

    /// Override for the progress state file
    #[serde(default)]
    pub progress_file: Option<PathBuf>,

    /// Override for the terminal-skip state file
    #[serde(default)]
    pub skipped_file: Option<PathBuf>,

    /// Append-only audit log of external call attempts (None disables it)
    #[serde(default)]
    pub audit_log: Option<PathBuf>,

    /// Re-fetch primary artifacts even when a derived artifact exists
    #[serde(default)]
    pub force_redownload: bool,

    /// Items produced concurrently per unit (default: 1)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry policy for the external operation
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shared spacing between external calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retention sweep settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Artifact naming
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Terminal skip allowlist
    #[serde(default)]
    pub skip_policy: SkipPolicyConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            artifacts_dir: None,
            summaries_dir: None,
            progress_file: None,
            skipped_file: None,
            audit_log: None,
            force_redownload: false,
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retention: RetentionConfig::default(),
            layout: LayoutConfig::default(),
            skip_policy: SkipPolicyConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency", "must be at least 1"));
        }
        self.retry.validate()?;
        self.retention.validate()?;
        self.layout.validate()?;
        self.skip_policy.validate()?;
        Ok(())
    }

    /// Directory holding primary artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        if let Some(dir) = &self.artifacts_dir {
            return dir.clone();
        }
        match self.layout.layout {
            ArtifactLayout::Canonical => self
                .output_root
                .join("data")
                .join("transcripts")
                .join("by_item_id"),
            ArtifactLayout::Legacy => self.output_root.join("1_transcripts"),
        }
    }

    /// Directory holding derived artifacts
    pub fn summaries_dir(&self) -> PathBuf {
        if let Some(dir) = &self.summaries_dir {
            return dir.clone();
        }
        match self.layout.layout {
            ArtifactLayout::Canonical => self
                .output_root
                .join("data")
                .join("summaries")
                .join("by_item_id"),
            ArtifactLayout::Legacy => self.output_root.join("2_summaries"),
        }
    }

    /// Progress state file
    pub fn progress_path(&self) -> PathBuf {
        self.progress_file
            .clone()
            .unwrap_or_else(|| self.output_root.join("progress.json"))
    }

    /// Terminal-skip state file
    pub fn skipped_path(&self) -> PathBuf {
        self.skipped_file
            .clone()
            .unwrap_or_else(|| self.output_root.join("skipped.json"))
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter_max() -> Duration {
    Duration::from_secs(1)
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_rate_jitter() -> Duration {
    Duration::from_secs(1)
}

fn default_retention_days() -> Option<i64> {
    Some(30)
}

fn default_primary_extension() -> String {
    "txt".to_string()
}

fn default_item_id_pattern() -> String {
    "[A-Za-z0-9_-]{11}".to_string()
}

fn default_terminal_statuses() -> Vec<String> {
    vec!["no_transcript".to_string(), "transcripts_disabled".to_string()]
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}

fn default_concurrency() -> usize {
    1
}

// Duration as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
