use super::*;
use chrono::Utc;
use tempfile::tempdir;

fn progress_with(unit: &str, ids: &[&str]) -> ProgressRecord {
    let mut record = ProgressRecord::new();
    for id in ids {
        record.insert(unit, id);
    }
    record
}

fn quarantined_files(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(".corrupted."))
        })
        .collect();
    found.sort();
    found
}

#[test]
fn load_missing_file_returns_empty_record() {
    let dir = tempdir().unwrap();
    let record: ProgressRecord = load(&dir.path().join("progress.json"));
    assert!(record.is_empty());
    assert!(quarantined_files(dir.path()).is_empty());
}

#[test]
fn save_then_load_returns_same_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let record = progress_with("UC1", &["bbbbbbbbbbb", "aaaaaaaaaaa"]);

    assert!(save(&path, &record, true));
    let loaded: ProgressRecord = load(&path);

    assert_eq!(loaded, record);
    // No previous version, so nothing to back up
    assert!(!backup_path(&path).exists());
}

#[test]
fn saved_file_is_pretty_sorted_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");

    save(&path, &progress_with("UC1", &["b", "a"]), true);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "{\n  \"UC1\": [\n    \"a\",\n    \"b\"\n  ]\n}\n");
}

#[test]
fn save_copies_previous_version_to_backup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let first = progress_with("UC1", &["aaaaaaaaaaa"]);
    let second = progress_with("UC1", &["aaaaaaaaaaa", "bbbbbbbbbbb"]);

    save(&path, &first, true);
    let first_bytes = std::fs::read(&path).unwrap();
    save(&path, &second, true);

    assert_eq!(std::fs::read(backup_path(&path)).unwrap(), first_bytes);
    let loaded: ProgressRecord = load(&path);
    assert_eq!(loaded, second);
}

#[test]
fn save_without_backup_leaves_no_bak() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");

    save(&path, &progress_with("UC1", &["a"]), false);
    save(&path, &progress_with("UC1", &["b"]), false);

    assert!(!backup_path(&path).exists());
}

#[test]
fn corrupt_primary_is_quarantined_and_backup_restored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let good = progress_with("UC1", &["aaaaaaaaaaa"]);

    // Produce a valid backup, then corrupt the primary
    save(&path, &good, true);
    save(&path, &progress_with("UC1", &["zzzzzzzzzzz"]), true);
    let garbage = b"{\"UC1\": [\"zzz".to_vec();
    std::fs::write(&path, &garbage).unwrap();

    let loaded: ProgressRecord = load(&path);

    assert_eq!(loaded, good);
    // Primary rewritten to match the backup
    let reread: ProgressRecord = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(reread, good);
    // Corrupt bytes preserved verbatim
    let quarantined = quarantined_files(dir.path());
    assert_eq!(quarantined.len(), 1);
    assert_eq!(std::fs::read(&quarantined[0]).unwrap(), garbage);
    let name = quarantined[0].file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("progress.corrupted."));
    assert!(name.ends_with(".json"));
}

#[test]
fn corrupt_primary_without_backup_yields_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, b"not json at all").unwrap();

    let loaded: ProgressRecord = load(&path);

    assert!(loaded.is_empty());
    assert!(!path.exists());
    assert_eq!(quarantined_files(dir.path()).len(), 1);
}

#[test]
fn wrong_shape_is_treated_as_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, br#"["aaaaaaaaaaa"]"#).unwrap();

    let loaded: ProgressRecord = load(&path);

    assert!(loaded.is_empty());
    assert_eq!(quarantined_files(dir.path()).len(), 1);
}

#[test]
fn corrupt_primary_and_corrupt_backup_yield_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    std::fs::write(&path, b"{").unwrap();
    std::fs::write(backup_path(&path), b"[").unwrap();

    let loaded: ProgressRecord = load(&path);

    assert!(loaded.is_empty());
    // The backup is left alone for inspection
    assert!(backup_path(&path).exists());
}

#[test]
fn missing_primary_with_backup_is_restored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let good = progress_with("UC1", &["aaaaaaaaaaa"]);
    std::fs::write(backup_path(&path), serde_json::to_vec(&good).unwrap()).unwrap();

    let loaded: ProgressRecord = load(&path);

    assert_eq!(loaded, good);
    assert!(path.exists());
    assert!(quarantined_files(dir.path()).is_empty());
}

#[test]
fn skipped_record_round_trips_through_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("skipped.json");
    let mut record = SkippedRecord::new();
    record.insert(
        "UC1",
        "aaaaaaaaaaa",
        SkipEntry::new("no_transcript", "captions disabled", Utc::now()),
    );

    assert!(save(&path, &record, true));
    let loaded: SkippedRecord = load(&path);

    assert_eq!(loaded, record);
}

#[test]
fn save_into_unwritable_location_returns_false() {
    let dir = tempdir().unwrap();
    // A regular file where a parent directory is expected
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let path = blocker.join("progress.json");

    assert!(!save(&path, &progress_with("UC1", &["a"]), true));
}

#[test]
fn quarantine_path_format() {
    assert_eq!(
        quarantine_path(Path::new("/s/progress.json"), 1_700_000_000),
        PathBuf::from("/s/progress.corrupted.1700000000.json")
    );
    assert_eq!(
        backup_path(Path::new("/s/progress.json")),
        PathBuf::from("/s/progress.bak")
    );
}
