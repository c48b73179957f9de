//! On-disk evidence that an item was processed
//!
//! Primary artifacts are checked for health (present, non-empty, sidecar status
//! not failed). Derived artifacts count only when their content names the same
//! item id, either in a `---` frontmatter block or in a `## Source` list.

use crate::layout::LayoutResolver;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Sidecar field carrying the producer status
pub const STATUS_FIELD: &str = "transcript_status";

/// Sidecar/frontmatter fields naming the owning run-unit, in lookup order
pub const OWNER_FIELDS: [&str; 2] = ["unit_key", "channel_id"];

/// Status value written for successfully produced artifacts
pub const SUCCESS_STATUS: &str = "success";

/// Health of an item's primary artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Health {
    /// Present, non-empty, sidecar absent or reporting success
    Ok,
    /// No primary artifact on disk
    Missing,
    /// Primary artifact contains only whitespace
    Empty,
    /// Primary artifact could not be read as UTF-8 text
    Unreadable,
    /// Sidecar exists but is not a JSON object
    MetadataInvalid,
    /// Sidecar exists but could not be read or parsed
    MetadataUnreadable,
    /// Sidecar reports a non-success status
    MetadataStatus(String),
}

impl Health {
    /// Whether the primary artifact can be trusted
    pub fn is_ok(&self) -> bool {
        matches!(self, Health::Ok)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Ok => write!(f, "ok"),
            Health::Missing => write!(f, "missing"),
            Health::Empty => write!(f, "empty"),
            Health::Unreadable => write!(f, "unreadable"),
            Health::MetadataInvalid => write!(f, "metadata_invalid"),
            Health::MetadataUnreadable => write!(f, "metadata_unreadable"),
            Health::MetadataStatus(status) => write!(f, "metadata_status={status}"),
        }
    }
}

/// Inspect the primary artifact of `item_id` in `artifacts_dir`
pub fn inspect_primary(resolver: &LayoutResolver, artifacts_dir: &Path, item_id: &str) -> Health {
    let Some(primary) = resolver.find_primary(artifacts_dir, item_id) else {
        return Health::Missing;
    };

    let text = match std::fs::read_to_string(&primary) {
        Ok(text) => text,
        Err(e) => {
            warn!(item_id = %item_id, path = ?primary, error = %e, "primary artifact unreadable");
            return Health::Unreadable;
        }
    };
    if text.trim().is_empty() {
        return Health::Empty;
    }

    let Some(meta_path) = existing_sidecar(resolver, &primary, item_id) else {
        return Health::Ok;
    };
    let meta = match std::fs::read_to_string(&meta_path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).map_err(|e| e.to_string()))
    {
        Ok(meta) => meta,
        Err(e) => {
            warn!(item_id = %item_id, path = ?meta_path, error = %e, "sidecar unreadable");
            return Health::MetadataUnreadable;
        }
    };
    let Some(object) = meta.as_object() else {
        return Health::MetadataInvalid;
    };

    match object.get(STATUS_FIELD).and_then(|v| v.as_str()) {
        Some(status) if status != SUCCESS_STATUS => Health::MetadataStatus(status.to_string()),
        _ => Health::Ok,
    }
}

/// Unit named by the sidecar of an existing primary artifact, if any
pub fn sidecar_owner(resolver: &LayoutResolver, primary: &Path, item_id: &str) -> Option<String> {
    let meta_path = existing_sidecar(resolver, primary, item_id)?;
    let text = std::fs::read_to_string(meta_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    let object = value.as_object()?;
    OWNER_FIELDS
        .iter()
        .filter_map(|field| object.get(*field).and_then(|v| v.as_str()))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn existing_sidecar(resolver: &LayoutResolver, primary: &Path, item_id: &str) -> Option<PathBuf> {
    resolver
        .meta_candidates(primary, item_id)
        .into_iter()
        .find(|p| p.is_file())
}

/// Metadata found in a valid derived artifact
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivedInfo {
    /// Run-unit named in the artifact, if any
    pub owner: Option<String>,
}

/// Check that the derived artifact at `path` belongs to `item_id`
///
/// Returns the reason on failure.
pub fn validate_derived(path: &Path, item_id: &str) -> Result<DerivedInfo, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("unreadable: {e}"))?;
    let text = text.replace("\r\n", "\n");

    let meta = if let Some(rest) = text.strip_prefix("---\n") {
        let end = rest
            .find("\n---")
            .ok_or_else(|| "frontmatter not terminated".to_string())?;
        parse_key_values(rest[..end].lines())
    } else {
        source_block(&text).ok_or_else(|| "no frontmatter or source block".to_string())?
    };

    let found = meta.get("item_id").or_else(|| meta.get("video_id"));
    match found {
        Some(id) if id == item_id => Ok(DerivedInfo {
            owner: OWNER_FIELDS
                .iter()
                .filter_map(|field| meta.get(*field))
                .find(|v| !v.is_empty())
                .cloned(),
        }),
        Some(other) => Err(format!("names item {other}")),
        None => Err("no item id".to_string()),
    }
}

/// Move an invalid derived artifact aside as `<stem>.corrupted.<ts><ext>`
pub fn quarantine_derived(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let target = path.with_file_name(format!(
        "{stem}.corrupted.{}{suffix}",
        chrono::Utc::now().timestamp()
    ));

    match std::fs::rename(path, &target) {
        Ok(()) => {
            warn!(path = ?path, quarantined = ?target, "invalid derived artifact quarantined");
            Some(target)
        }
        Err(e) => {
            error!(path = ?path, error = %e, "failed to quarantine derived artifact");
            None
        }
    }
}

/// Whether a valid derived artifact for `item_id` exists in `summaries_dir`
///
/// With `quarantine_invalid`, an invalid artifact is moved aside.
pub fn has_valid_derived(
    resolver: &LayoutResolver,
    summaries_dir: &Path,
    item_id: &str,
    quarantine_invalid: bool,
) -> bool {
    let Some(path) = resolver.find_derived(summaries_dir, item_id) else {
        return false;
    };
    match validate_derived(&path, item_id) {
        Ok(_) => true,
        Err(reason) => {
            warn!(
                item_id = %item_id,
                path = ?path,
                reason = %reason,
                "derived artifact invalid, treating as missing"
            );
            if quarantine_invalid {
                quarantine_derived(&path);
            }
            false
        }
    }
}

fn parse_key_values<'a>(lines: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                meta.insert(key.to_string(), unquote(value.trim()).to_string());
            }
        }
    }
    meta
}

// "## Source" followed by "- key: value" lines up to the next heading
fn source_block(text: &str) -> Option<BTreeMap<String, String>> {
    let start = text.find("## Source")?;
    let items = text[start..]
        .lines()
        .skip(1)
        .map(str::trim)
        .take_while(|line| !line.starts_with("## "))
        .filter_map(|line| line.strip_prefix("- "));
    let meta = parse_key_values(items);
    (!meta.is_empty()).then_some(meta)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
