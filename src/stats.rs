//! Per-run counters
//!
//! [`RunStats`] is shared by reference between the runner and its workers;
//! [`RunStatsSnapshot`] is the plain, serializable view handed back to callers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one run
#[derive(Debug, Default)]
pub struct RunStats {
    items_considered: AtomicU64,
    downloaded: AtomicU64,
    skipped_existing: AtomicU64,
    skipped_derived: AtomicU64,
    skipped_previously: AtomicU64,
    healed: AtomicU64,
    unavailable: AtomicU64,
    blocked: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    /// Items the driver looked at
    pub items_considered: u64,
    /// Primary artifacts written
    pub downloaded: u64,
    /// Skipped because already processed
    pub skipped_existing: u64,
    /// Skipped because a derived artifact exists
    pub skipped_derived: u64,
    /// Skipped because of a recorded terminal skip
    pub skipped_previously: u64,
    /// Unhealthy artifacts that were produced again
    pub healed: u64,
    /// Newly recorded terminal skips
    pub unavailable: u64,
    /// Failures where the service refused further requests
    pub blocked: u64,
    /// Retryable failures left for the next run
    pub errors: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Increment `", stringify!($field), "`")]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl RunStats {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_considered => items_considered,
        record_downloaded => downloaded,
        record_skipped_existing => skipped_existing,
        record_skipped_derived => skipped_derived,
        record_skipped_previously => skipped_previously,
        record_healed => healed,
        record_unavailable => unavailable,
        record_blocked => blocked,
        record_error => errors,
    }

    /// Copy the current values
    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            items_considered: self.items_considered.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            skipped_existing: self.skipped_existing.load(Ordering::Relaxed),
            skipped_derived: self.skipped_derived.load(Ordering::Relaxed),
            skipped_previously: self.skipped_previously.load(Ordering::Relaxed),
            healed: self.healed.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl RunStatsSnapshot {
    /// Items skipped for any reason
    pub fn skipped_total(&self) -> u64 {
        self.skipped_existing + self.skipped_derived + self.skipped_previously
    }
}
