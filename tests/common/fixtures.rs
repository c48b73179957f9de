//! Output-root fixtures

use resumable_ingest::{IngestConfig, RateLimitConfig, RetryConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Well-formed item ids
pub const ITEM_A: &str = "aaaaaaaaaaa";
pub const ITEM_B: &str = "bbbbbbbbbbb";
pub const ITEM_C: &str = "ccccccccccc";
pub const ITEM_D: &str = "ddddddddddd";

/// Run-unit used by most tests
pub const UNIT: &str = "UCintegration";

/// Config rooted in `root` with no call spacing and one retry
pub fn test_config(root: &TempDir) -> IngestConfig {
    IngestConfig {
        output_root: root.path().to_path_buf(),
        retry: RetryConfig {
            max_retries: 1,
            jitter_max: Duration::ZERO,
            ..RetryConfig::default()
        },
        rate_limit: RateLimitConfig {
            min_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        },
        ..IngestConfig::default()
    }
}

/// Write a primary artifact plus sidecar the way a finished run leaves them
pub fn write_finished_artifact(config: &IngestConfig, unit: &str, id: &str, text: &str) -> PathBuf {
    let dir = config.artifacts_dir();
    std::fs::create_dir_all(&dir).unwrap();
    let primary = dir.join(format!("{id}.txt"));
    std::fs::write(&primary, text).unwrap();
    std::fs::write(
        dir.join(format!("{id}.meta.json")),
        format!(r#"{{"item_id": "{id}", "unit_key": "{unit}", "transcript_status": "success"}}"#),
    )
    .unwrap();
    primary
}

/// Files directly inside `dir` whose name contains `needle`
pub fn files_containing(dir: &Path, needle: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(needle))
        .collect();
    names.sort();
    names
}
