//! Append-only audit trail of external call attempts
//!
//! One JSON object per line. Writing the trail is best effort: a failed append
//! is logged and otherwise ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One external call attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Call-site label, e.g. `summarize`
    pub operation: String,
    /// Whether the attempt succeeded
    pub success: bool,
    /// 1-based attempt number
    pub attempt: u32,
    /// Attempts allowed by the policy
    pub max_attempts: u32,
    /// Retries made before this attempt
    pub retry_count: u32,
    /// Wall-clock duration of the attempt
    pub latency_ms: u64,
    /// Failure category, or `unexpected`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Display text of the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// HTTP status of the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Server wait hint converted to seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<f64>,
    /// Sleep before the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time_s: Option<f64>,
    /// Whether the failure allowed another attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Set when the failure ended the call without exhausting retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<bool>,
    /// Usage reported by a successful call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    /// Usage reported by a successful call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// Usage reported by a successful call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl AttemptRecord {
    /// Skeleton record for `attempt` of `operation`
    pub fn new(operation: &str, attempt: u32, max_attempts: u32, latency_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            success: false,
            attempt,
            max_attempts,
            retry_count: attempt.saturating_sub(1),
            latency_ms,
            error_type: None,
            error_message: None,
            status_code: None,
            retry_after_s: None,
            wait_time_s: None,
            retryable: None,
            fatal: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        }
    }
}

/// Destination for attempt records
pub trait AuditSink: Send + Sync {
    /// Append one record; must not panic or block for long
    fn append(&self, record: &AttemptRecord);
}

/// JSONL file sink
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    // Serializes appends from concurrent workers
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// Append to `path`, creating it (and its parent) on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_append(&self, record: &AttemptRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: &AttemptRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::warn!(path = ?self.path, error = %e, "failed to append audit record");
        }
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AttemptRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}
