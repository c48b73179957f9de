//! Recovery from interrupted runs and damaged state files

mod common;

use chrono::Utc;
use common::{
    Answer, ITEM_A, ITEM_B, ITEM_C, ScriptedProducer, UNIT, files_containing, test_config,
    write_finished_artifact,
};
use resumable_ingest::state::{self, backup_path};
use resumable_ingest::{
    IngestConfig, LayoutResolver, MemoryMetrics, NoopMetrics, ProgressRecord, RetentionSweeper,
    UnitRunner, WorkItem,
};
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn items(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter().map(|id| WorkItem::new(*id)).collect()
}

fn new_runner(
    config: &IngestConfig,
    producer: &Arc<ScriptedProducer>,
) -> UnitRunner<Arc<ScriptedProducer>> {
    UnitRunner::new(config, producer.clone(), Arc::new(NoopMetrics)).unwrap()
}

fn text_producer(ids: &[&str]) -> Arc<ScriptedProducer> {
    let producer = ids.iter().fold(ScriptedProducer::new(), |p, id| {
        p.answer(id, Answer::Text(format!("transcript {id}")))
    });
    Arc::new(producer)
}

#[tokio::test]
async fn lost_progress_file_is_rebuilt_from_artifacts() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    let producer = text_producer(&[ITEM_A, ITEM_B]);
    new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    std::fs::remove_file(config.progress_path()).unwrap();
    let _ = std::fs::remove_file(backup_path(&config.progress_path()));

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    assert_eq!(
        report.reconciled_added,
        vec![ITEM_A.to_string(), ITEM_B.to_string()]
    );
    assert_eq!(report.stats.skipped_existing, 2);
    assert_eq!(producer.calls(ITEM_A), 1);
    assert_eq!(producer.calls(ITEM_B), 1);
}

#[tokio::test]
async fn corrupted_progress_file_is_quarantined_and_recovered() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    let producer = text_producer(&[ITEM_A, ITEM_B]);
    new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    // Torn write from a crashed writer that bypassed the atomic path
    std::fs::write(config.progress_path(), "{\"UCintegration\": [\"aaa").unwrap();

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    assert_eq!(report.stats.skipped_existing, 2);
    assert_eq!(producer.calls(ITEM_A), 1);
    assert_eq!(files_containing(root.path(), "progress.corrupted.").len(), 1);

    let progress: ProgressRecord = state::load(&config.progress_path());
    assert!(progress.contains(UNIT, ITEM_A));
    assert!(progress.contains(UNIT, ITEM_B));
}

#[tokio::test]
async fn sidecar_without_primary_is_not_evidence() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    // Interrupted between the sidecar and the primary write
    let dir = config.artifacts_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{ITEM_A}.meta.json")),
        r#"{"transcript_status": "success"}"#,
    )
    .unwrap();
    std::fs::write(dir.join(format!("{ITEM_A}.txt.tmp")), "half").unwrap();
    let producer = text_producer(&[ITEM_A]);

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A]))
        .await
        .unwrap();

    assert!(report.reconciled_added.is_empty());
    assert_eq!(report.stats.downloaded, 1);
    assert_eq!(
        std::fs::read_to_string(dir.join(format!("{ITEM_A}.txt"))).unwrap(),
        format!("transcript {ITEM_A}")
    );
}

#[tokio::test]
async fn orphaned_progress_entries_are_dropped_and_refetched() {
    let root = tempdir().unwrap();
    let config = test_config(&root);

    let mut progress = ProgressRecord::new();
    progress.insert(UNIT, ITEM_A);
    progress.insert(UNIT, ITEM_C);
    assert!(state::save(&config.progress_path(), &progress, false));
    write_finished_artifact(&config, UNIT, ITEM_C, "still here");
    let producer = text_producer(&[ITEM_A]);

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_C]))
        .await
        .unwrap();

    assert_eq!(report.reconciled_removed, vec![ITEM_A.to_string()]);
    assert_eq!(producer.calls(ITEM_A), 1);
    assert_eq!(producer.calls(ITEM_C), 0);
}

#[tokio::test]
async fn retention_sweep_then_rerun_refetches_expired_items() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    let producer = text_producer(&[ITEM_A, ITEM_B]);
    new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    // Age A's files past the window
    let dir = config.artifacts_dir();
    let old = SystemTime::now() - Duration::from_secs(40 * 86_400);
    for name in [format!("{ITEM_A}.txt"), format!("{ITEM_A}.meta.json")] {
        File::options()
            .write(true)
            .open(dir.join(name))
            .unwrap()
            .set_modified(old)
            .unwrap();
    }

    let metrics = Arc::new(MemoryMetrics::new());
    let cleanup = RetentionSweeper::new()
        .with_resolver(LayoutResolver::new(&config.layout).unwrap())
        .with_metrics(metrics.clone())
        .cleanup(&dir, config.retention.retention_days, Utc::now())
        .unwrap();
    assert_eq!(cleanup.deleted_files, 2);
    assert_eq!(cleanup.deleted_item_ids, vec![ITEM_A.to_string()]);

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    assert_eq!(report.reconciled_removed, vec![ITEM_A.to_string()]);
    assert_eq!(producer.calls(ITEM_A), 2);
    assert_eq!(producer.calls(ITEM_B), 1);
}
