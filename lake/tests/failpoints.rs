use lake::concurrency::shutdown::create_shutdown_channel;
use lake::failpoints::{REORG_FLUSH_CHUNK, TABLE_COMMIT_PARTITION};
use lake::layout::organized;
use lake::reorg::{ChunkOutcome, MergeOptions, StreamingChunkMerger};
use lake::table::{CommitOptions, FileTableStore, TableCommitter, TableStore};
use lake::test_utils::failpoints::FailpointGuard;
use lake::test_utils::{RawFixture, date, entity_ids, observation, weekly_dates, write_chunk_file};
use lake::types::ChunkId;
use lake_telemetry::tracing::init_test_tracing;
use tempfile::TempDir;

fn write_raw(raw: &TempDir) {
    RawFixture::new(raw.path()).write_grid(
        "32TNR",
        &entity_ids("p", 12),
        &weekly_dates(date(2024, 1, 1), 2),
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_flush_failure_is_retried() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(REORG_FLUSH_CHUNK, "1*return->off")]);
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    write_raw(&raw);

    let (_tx, rx) = create_shutdown_channel();
    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), MergeOptions::new(1), rx)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.rows_written, 24);
    assert!(organized::inspect_chunk(organized.path(), ChunkId(0)).is_valid());
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_flush_failure_fails_the_chunk() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(REORG_FLUSH_CHUNK, "return(disk full)")]);
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    write_raw(&raw);

    let mut options = MergeOptions::new(2);
    options.max_flush_attempts = 2;
    let (_tx, rx) = create_shutdown_channel();
    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), options, rx)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!summary.is_complete());
    assert_eq!(summary.failed, 2);
    for chunk in ChunkId::all(2) {
        let ChunkOutcome::Failed { reason } = &summary.chunks[&chunk] else {
            panic!("chunk {chunk} did not fail");
        };
        assert!(reason.contains("after 2 attempts"), "{reason}");
        assert!(reason.contains("disk full"), "{reason}");
        assert!(!organized::chunk_file(organized.path(), chunk).exists());
    }
    assert!(!organized::staging_dir(organized.path()).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_commit_keeps_the_previous_partition() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let table = TempDir::new().unwrap();
    let day = date(2024, 1, 1);
    write_chunk_file(organized.path(), ChunkId(0), &[observation("a", day, 1.0)]);

    let store = FileTableStore::open(table.path(), 1_000_000).unwrap();
    let (_tx, rx) = create_shutdown_channel();
    TableCommitter::new(store.clone(), CommitOptions::default(), rx.clone())
        .commit_organized(organized.path(), 1)
        .await
        .unwrap();

    write_chunk_file(organized.path(), ChunkId(0), &[observation("a", day, 7.0)]);
    let forced = CommitOptions {
        force: true,
        ..CommitOptions::default()
    };

    let summary = {
        let _guard = FailpointGuard::setup(&[(TABLE_COMMIT_PARTITION, "return")]);
        TableCommitter::new(store.clone(), forced, rx)
            .commit_organized(organized.path(), 1)
            .await
            .unwrap()
    };

    assert_eq!(summary.failed, 1);
    assert!(summary.failed_chunks()[&ChunkId(0)].contains("failpoint"));

    let records = store.read_partition(ChunkId(0)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].measurements.ndvi, 1.0);
    assert_eq!(store.history().unwrap().len(), 1);
}
