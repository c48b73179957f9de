//! Artifact naming
//!
//! Two on-disk conventions exist side by side:
//!
//! | layout      | primary                               | sidecar               | derived               |
//! |-------------|---------------------------------------|-----------------------|-----------------------|
//! | `legacy`    | `{date}_{sanitized_unit}_{id}.{ext}`  | `{stem}_meta.json`    | `{id}.md`             |
//! | `canonical` | `{id}.{ext}`                          | `{id}.meta.json`      | `{id}.summary.md`     |
//!
//! New artifacts are written with the configured layout. Parsing accepts both, so
//! reconciliation keeps working across a layout migration.

use crate::config::LayoutConfig;
use crate::error::{Error, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Artifact naming convention
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    /// Per-unit directories, date and unit name in the primary file name
    Legacy,
    /// Shared directories keyed by item id
    #[default]
    Canonical,
}

/// Where the artifacts of one item live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Primary artifact (e.g. transcript)
    pub primary: PathBuf,
    /// Sidecar metadata next to the primary artifact
    pub meta: PathBuf,
    /// Derived artifact, when a derived directory is configured
    pub derived: Option<PathBuf>,
}

/// Replace non-word characters with `_`, collapse runs and trim underscores
///
/// Hyphens are kept.
pub fn sanitize_unit_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let keep = c.is_alphanumeric() || c == '-';
        if keep {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Compiled naming rules for one primary extension and item id pattern
#[derive(Clone, Debug)]
pub struct LayoutResolver {
    layout: ArtifactLayout,
    extension: String,
    item_id: Regex,
    canonical_primary: Regex,
    legacy_primary: Regex,
    canonical_derived: Regex,
    legacy_derived: Regex,
}

impl LayoutResolver {
    /// Compile the resolver from configuration
    pub fn new(config: &LayoutConfig) -> Result<Self> {
        let pattern = &config.item_id_pattern;
        let ext = regex::escape(&config.primary_extension);
        let compile = |re: String| {
            Regex::new(&re).map_err(|e| {
                Error::config("layout.item_id_pattern", format!("invalid regex: {e}"))
            })
        };

        Ok(Self {
            layout: config.layout,
            extension: config.primary_extension.clone(),
            item_id: compile(format!("^(?:{pattern})$"))?,
            canonical_primary: compile(format!(r"^({pattern})\.{ext}$"))?,
            legacy_primary: compile(format!(r"^.+_({pattern})\.{ext}$"))?,
            canonical_derived: compile(format!(r"^({pattern})\.summary\.md$"))?,
            legacy_derived: compile(format!(r"^({pattern})\.md$"))?,
        })
    }

    /// Layout used for new artifacts
    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    /// Primary artifact extension, without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether `id` is a well-formed item id
    pub fn is_item_id(&self, id: &str) -> bool {
        self.item_id.is_match(id)
    }

    /// Paths for a new artifact of `item_id` in `unit`
    pub fn resolve(
        &self,
        root: &Path,
        summaries_root: Option<&Path>,
        unit: &str,
        item_id: &str,
        date: NaiveDate,
    ) -> ArtifactPaths {
        let (primary_name, meta_name) = match self.layout {
            ArtifactLayout::Canonical => (
                format!("{item_id}.{}", self.extension),
                format!("{item_id}.meta.json"),
            ),
            ArtifactLayout::Legacy => {
                let stem = format!(
                    "{}_{}_{item_id}",
                    date.format("%Y-%m-%d"),
                    sanitize_unit_name(unit)
                );
                (
                    format!("{stem}.{}", self.extension),
                    format!("{stem}_meta.json"),
                )
            }
        };

        ArtifactPaths {
            primary: root.join(primary_name),
            meta: root.join(meta_name),
            derived: summaries_root.map(|dir| dir.join(self.derived_file_name(item_id))),
        }
    }

    /// Derived artifact file name in the configured layout
    pub fn derived_file_name(&self, item_id: &str) -> String {
        derived_name(self.layout, item_id)
    }

    /// Item id of a primary artifact file name, in either layout
    ///
    /// Sidecars, temp files and quarantined files never match.
    pub fn parse_primary(&self, file_name: &str) -> Option<String> {
        self.canonical_primary
            .captures(file_name)
            .or_else(|| self.legacy_primary.captures(file_name))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Item id of a derived artifact file name, in either layout
    pub fn parse_derived(&self, file_name: &str) -> Option<String> {
        self.canonical_derived
            .captures(file_name)
            .or_else(|| self.legacy_derived.captures(file_name))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Existing primary artifact for `item_id` in `dir`
    ///
    /// The canonical name wins; otherwise the first legacy match in sorted order.
    pub fn find_primary(&self, dir: &Path, item_id: &str) -> Option<PathBuf> {
        let direct = dir.join(format!("{item_id}.{}", self.extension));
        if direct.is_file() {
            return Some(direct);
        }

        let suffix = format!("_{item_id}.{}", self.extension);
        let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&suffix))
            })
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Existing derived artifact for `item_id`, configured layout first
    pub fn find_derived(&self, summaries_dir: &Path, item_id: &str) -> Option<PathBuf> {
        let other = match self.layout {
            ArtifactLayout::Canonical => ArtifactLayout::Legacy,
            ArtifactLayout::Legacy => ArtifactLayout::Canonical,
        };
        [self.layout, other]
            .into_iter()
            .map(|layout| summaries_dir.join(derived_name(layout, item_id)))
            .find(|path| path.is_file())
    }

    /// Sidecar candidates for an existing primary artifact
    ///
    /// `{id}.meta.json` for canonical names, `{stem}_meta.json` otherwise.
    pub fn meta_candidates(&self, primary: &Path, item_id: &str) -> Vec<PathBuf> {
        let stem = primary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut candidates = Vec::with_capacity(2);
        if stem == item_id {
            candidates.push(primary.with_file_name(format!("{item_id}.meta.json")));
        }
        candidates.push(primary.with_file_name(format!("{stem}_meta.json")));
        candidates
    }

    /// Whether `path` is any artifact of this layout family
    ///
    /// Used by retention to attribute deleted files to item ids.
    pub fn item_id_of(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        self.parse_primary(name)
    }
}

fn derived_name(layout: ArtifactLayout, item_id: &str) -> String {
    match layout {
        ArtifactLayout::Canonical => format!("{item_id}.summary.md"),
        ArtifactLayout::Legacy => format!("{item_id}.md"),
    }
}
