//! Behaviour across consecutive runs over the same output root
//!
//! Each test builds a fresh runner per "process lifetime", so nothing is carried
//! over in memory between runs.

mod common;

use chrono::NaiveDate;
use common::{
    Answer, ITEM_A, ITEM_B, ITEM_C, ITEM_D, ScriptedProducer, ServiceError, UNIT,
    files_containing, test_config, write_finished_artifact,
};
use resumable_ingest::state;
use resumable_ingest::{
    ArtifactLayout, Decision, IngestConfig, ItemOutcome, NoopMetrics, ProgressRecord, SkipEntry,
    SkippedRecord, UnitRunner, WorkItem,
};
use std::sync::Arc;
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

#[tokio::test(start_paused = true)]
async fn only_errors_are_retried_on_the_next_run() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    let producer = Arc::new(
        ScriptedProducer::new()
            .answer(ITEM_A, Answer::Text("first transcript".into()))
            .answer(ITEM_B, Answer::Absent("transcripts_disabled".into()))
            .answer(ITEM_C, Answer::Fail(ServiceError::Reset))
            .answer(ITEM_D, Answer::Fail(ServiceError::Status(403))),
    );
    let candidates = items(&[ITEM_A, ITEM_B, ITEM_C, ITEM_D]);

    let first = new_runner(&config, &producer)
        .run_unit(UNIT, &candidates)
        .await
        .unwrap();
    assert_eq!(first.stats.downloaded, 1);
    assert_eq!(first.stats.unavailable, 1);
    assert_eq!(first.stats.errors, 2);

    let second = new_runner(&config, &producer)
        .run_unit(UNIT, &candidates)
        .await
        .unwrap();
    assert_eq!(second.stats.skipped_existing, 1);
    assert_eq!(second.stats.skipped_previously, 1);
    assert_eq!(second.stats.downloaded, 0);

    assert_eq!(producer.calls(ITEM_A), 1);
    assert_eq!(producer.calls(ITEM_B), 1);
    // Connection reset: two attempts per run
    assert_eq!(producer.calls(ITEM_C), 4);
    // 403 is not retried within a run, but the item stays eligible
    assert_eq!(producer.calls(ITEM_D), 2);
}

#[tokio::test]
async fn out_of_band_artifact_overrides_a_skip() {
    let root = tempdir().unwrap();
    let config = test_config(&root);

    let mut skipped = SkippedRecord::new();
    skipped.insert(
        UNIT,
        ITEM_A,
        SkipEntry::new("no_transcript", "", chrono::Utc::now()),
    );
    assert!(state::save(&config.skipped_path(), &skipped, false));

    let producer = Arc::new(ScriptedProducer::new().answer(ITEM_A, Answer::Text("late".into())));
    let runner = new_runner(&config, &producer);
    let report = runner.run_unit(UNIT, &items(&[ITEM_A])).await.unwrap();
    assert!(matches!(report.items[0].decision, Decision::PreviouslySkipped(_)));
    assert_eq!(producer.calls(ITEM_A), 0);

    // An artifact appearing out of band takes precedence over the skip
    write_finished_artifact(&config, UNIT, ITEM_A, "arrived later");
    let report = runner.run_unit(UNIT, &items(&[ITEM_A])).await.unwrap();
    assert_eq!(report.items[0].decision, Decision::AlreadyProcessed);
    let skipped: SkippedRecord = state::load(&config.skipped_path());
    assert!(skipped.get(UNIT, ITEM_A).is_none());
}

#[tokio::test]
async fn healed_item_that_disappeared_is_not_fetched_again() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    write_finished_artifact(&config, UNIT, ITEM_A, "");
    let mut progress = ProgressRecord::new();
    progress.insert(UNIT, ITEM_A);
    assert!(state::save(&config.progress_path(), &progress, false));
    let producer = Arc::new(
        ScriptedProducer::new().answer(ITEM_A, Answer::Absent("no_transcript".into())),
    );

    for _ in 0..3 {
        new_runner(&config, &producer)
            .run_unit(UNIT, &items(&[ITEM_A]))
            .await
            .unwrap();
    }

    assert_eq!(producer.calls(ITEM_A), 1);
    assert!(files_containing(&config.artifacts_dir(), ITEM_A).is_empty());
    let progress: ProgressRecord = state::load(&config.progress_path());
    assert!(!progress.contains(UNIT, ITEM_A));
    let skipped: SkippedRecord = state::load(&config.skipped_path());
    assert_eq!(skipped.get(UNIT, ITEM_A).unwrap().status, "no_transcript");
}

#[tokio::test]
async fn progress_and_skips_never_overlap() {
    let root = tempdir().unwrap();
    let config = test_config(&root);

    // A: recorded but unhealthy, and gone from the service
    write_finished_artifact(&config, UNIT, ITEM_A, " ");
    let mut progress = ProgressRecord::new();
    progress.insert(UNIT, ITEM_A);
    // C: left in both files by a crash between the two saves
    progress.insert(UNIT, ITEM_C);
    assert!(state::save(&config.progress_path(), &progress, false));

    let mut skipped = SkippedRecord::new();
    let now = chrono::Utc::now();
    // B: skipped, then an artifact shows up out of band
    skipped.insert(UNIT, ITEM_B, SkipEntry::new("no_transcript", "", now));
    skipped.insert(UNIT, ITEM_C, SkipEntry::new("no_transcript", "", now));
    // D: skipped under a status that is no longer terminal
    skipped.insert(UNIT, ITEM_D, SkipEntry::new("members_only", "", now));
    assert!(state::save(&config.skipped_path(), &skipped, false));
    write_finished_artifact(&config, UNIT, ITEM_B, "arrived later");

    let producer = Arc::new(
        ScriptedProducer::new()
            .answer(ITEM_A, Answer::Absent("no_transcript".into()))
            .answer(ITEM_D, Answer::Text("now public".into())),
    );
    let candidates = items(&[ITEM_A, ITEM_B, ITEM_C, ITEM_D]);

    for _ in 0..2 {
        new_runner(&config, &producer)
            .run_unit(UNIT, &candidates)
            .await
            .unwrap();

        let progress: ProgressRecord = state::load(&config.progress_path());
        let skipped: SkippedRecord = state::load(&config.skipped_path());
        let done = progress.items(UNIT).cloned().unwrap_or_default();
        let skips = skipped.items(UNIT).cloned().unwrap_or_default();
        let both: Vec<_> = done.iter().filter(|id| skips.contains_key(*id)).collect();
        assert!(both.is_empty(), "ids both processed and skipped: {both:?}");
    }

    let progress: ProgressRecord = state::load(&config.progress_path());
    assert!(progress.contains(UNIT, ITEM_B));
    assert!(progress.contains(UNIT, ITEM_D));
    let skipped: SkippedRecord = state::load(&config.skipped_path());
    assert!(skipped.get(UNIT, ITEM_A).is_some());
    assert!(skipped.get(UNIT, ITEM_C).is_some());
    assert_eq!(producer.calls(ITEM_A), 1);
    assert_eq!(producer.calls(ITEM_C), 0);
    assert_eq!(producer.calls(ITEM_D), 1);
}

#[tokio::test]
async fn non_allowlisted_skip_is_not_remembered() {
    let root = tempdir().unwrap();
    let mut config = test_config(&root);
    config.skip_policy.terminal_statuses = vec!["members_only".to_string()];
    let producer = Arc::new(
        ScriptedProducer::new()
            .answer(ITEM_A, Answer::Absent("no_transcript".into()))
            .answer(ITEM_B, Answer::Absent("members_only".into())),
    );

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A, ITEM_B]))
        .await
        .unwrap();

    assert!(matches!(report.items[0].outcome, Some(ItemOutcome::Error { .. })));
    assert!(matches!(
        report.items[1].outcome,
        Some(ItemOutcome::SkippedExpected { .. })
    ));
    let skipped: SkippedRecord = state::load(&config.skipped_path());
    assert!(skipped.get(UNIT, ITEM_A).is_none());
    assert_eq!(skipped.get(UNIT, ITEM_B).unwrap().status, "members_only");
}

#[tokio::test]
async fn units_sharing_a_directory_keep_their_own_items() {
    let root = tempdir().unwrap();
    let config = test_config(&root);
    write_finished_artifact(&config, "UCother", ITEM_B, "someone else's");
    let producer = Arc::new(ScriptedProducer::new().answer(ITEM_A, Answer::Text("mine".into())));

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A]))
        .await
        .unwrap();

    assert!(report.reconciled_added.is_empty());
    let progress: ProgressRecord = state::load(&config.progress_path());
    assert!(progress.contains(UNIT, ITEM_A));
    assert!(!progress.contains(UNIT, ITEM_B));

    let other = new_runner(&config, &producer)
        .run_unit("UCother", &[])
        .await
        .unwrap();
    assert_eq!(other.reconciled_added, vec![ITEM_B.to_string()]);
}

#[tokio::test]
async fn legacy_layout_names_files_by_date_and_unit() {
    let root = tempdir().unwrap();
    let mut config = test_config(&root);
    config.layout.layout = ArtifactLayout::Legacy;
    let producer = Arc::new(ScriptedProducer::new().answer(ITEM_A, Answer::Text("legacy".into())));
    let published = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    new_runner(&config, &producer)
        .run_unit("My Channel!", &[WorkItem::new(ITEM_A).with_published(published)])
        .await
        .unwrap();

    let dir = root.path().join("1_transcripts");
    assert_eq!(
        files_containing(&dir, ITEM_A),
        vec![
            format!("2024-03-01_My_Channel_{ITEM_A}.txt"),
            format!("2024-03-01_My_Channel_{ITEM_A}_meta.json"),
        ]
    );

    // A rerun recognises the legacy file without producing it again
    let report = new_runner(&config, &producer)
        .run_unit("My Channel!", &items(&[ITEM_A]))
        .await
        .unwrap();
    assert_eq!(report.items[0].decision, Decision::AlreadyProcessed);
    assert_eq!(producer.calls(ITEM_A), 1);
}

#[tokio::test]
async fn legacy_artifact_is_healed_in_place() {
    let root = tempdir().unwrap();
    let mut config = test_config(&root);
    config.layout.layout = ArtifactLayout::Legacy;
    let dir = root.path().join("1_transcripts");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("2023-01-01_UCintegration_{ITEM_A}.txt")), "  ").unwrap();
    let producer = Arc::new(ScriptedProducer::new().answer(ITEM_A, Answer::Text("fixed".into())));

    let report = new_runner(&config, &producer)
        .run_unit(UNIT, &items(&[ITEM_A]))
        .await
        .unwrap();

    assert_eq!(report.stats.healed, 1);
    assert_eq!(
        files_containing(&dir, ITEM_A),
        vec![
            format!("2023-01-01_UCintegration_{ITEM_A}.txt"),
            format!("2023-01-01_UCintegration_{ITEM_A}_meta.json"),
        ]
    );
    let healed = dir.join(format!("2023-01-01_UCintegration_{ITEM_A}.txt"));
    assert_eq!(std::fs::read_to_string(healed).unwrap(), "fixed");
}
