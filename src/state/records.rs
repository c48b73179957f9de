//! Persisted state records

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A JSON document managed by [`load`](super::load) and [`save`](super::save)
///
/// Deserialization doubles as shape validation: anything that does not decode
/// into `Self` is treated like a parse failure and recovered from.
pub trait StateRecord: Serialize + DeserializeOwned + Default {
    /// Human-readable name used in log events
    const KIND: &'static str;

    /// Whether the record holds no entries at all
    fn is_empty(&self) -> bool;
}

/// Known-processed item ids per run-unit
///
/// Persisted as `{ "<unit>": ["<id>", ...] }`. Ids within a unit are sorted and
/// unique by construction, so serialization is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressRecord(BTreeMap<String, BTreeSet<String>>);

impl ProgressRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids recorded for `unit`, if the unit is known
    pub fn items(&self, unit: &str) -> Option<&BTreeSet<String>> {
        self.0.get(unit)
    }

    /// Whether `item_id` is recorded as processed under `unit`
    pub fn contains(&self, unit: &str, item_id: &str) -> bool {
        self.0.get(unit).is_some_and(|ids| ids.contains(item_id))
    }

    /// Record `item_id` under `unit`; returns false if it was already present
    pub fn insert(&mut self, unit: &str, item_id: &str) -> bool {
        self.0
            .entry(unit.to_string())
            .or_default()
            .insert(item_id.to_string())
    }

    /// Forget `item_id` under `unit`; returns false if it was not recorded
    ///
    /// A unit left without ids is dropped.
    pub fn remove(&mut self, unit: &str, item_id: &str) -> bool {
        let Some(ids) = self.0.get_mut(unit) else {
            return false;
        };
        let removed = ids.remove(item_id);
        if ids.is_empty() {
            self.0.remove(unit);
        }
        removed
    }

    /// Replace the full id set of `unit`
    pub fn set_unit(&mut self, unit: &str, ids: BTreeSet<String>) {
        self.0.insert(unit.to_string(), ids);
    }

    /// Iterate units in sorted order
    pub fn units(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Total number of recorded ids across all units
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}

impl StateRecord for ProgressRecord {
    const KIND: &'static str = "progress";

    fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

/// Why an item was recorded as a terminal, expected absence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    /// Producer status, e.g. `no_transcript`
    pub status: String,
    /// Free-form detail reported alongside the status
    #[serde(default)]
    pub reason: String,
    /// When the skip was recorded
    pub timestamp: DateTime<Utc>,
}

impl SkipEntry {
    /// Create an entry stamped with `timestamp`
    pub fn new(
        status: impl Into<String>,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            status: status.into(),
            reason: reason.into(),
            timestamp,
        }
    }
}

/// Terminal skips per run-unit
///
/// Persisted as `{ "<unit>": { "<id>": {"status", "reason", "timestamp"} } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkippedRecord(BTreeMap<String, BTreeMap<String, SkipEntry>>);

impl SkippedRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `item_id` under `unit`
    pub fn get(&self, unit: &str, item_id: &str) -> Option<&SkipEntry> {
        self.0.get(unit).and_then(|items| items.get(item_id))
    }

    /// Record or overwrite a skip entry
    pub fn insert(&mut self, unit: &str, item_id: &str, entry: SkipEntry) {
        self.0
            .entry(unit.to_string())
            .or_default()
            .insert(item_id.to_string(), entry);
    }

    /// Remove an entry; a unit left without entries is dropped as well
    pub fn remove(&mut self, unit: &str, item_id: &str) -> Option<SkipEntry> {
        let items = self.0.get_mut(unit)?;
        let removed = items.remove(item_id);
        if items.is_empty() {
            self.0.remove(unit);
        }
        removed
    }

    /// Entries recorded for `unit`
    pub fn items(&self, unit: &str) -> Option<&BTreeMap<String, SkipEntry>> {
        self.0.get(unit)
    }

    /// Total number of entries across all units
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }
}

impl StateRecord for SkippedRecord {
    const KIND: &'static str = "skipped";

    fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}
