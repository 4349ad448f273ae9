use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use lake::codec;
use lake::concurrency::shutdown::create_shutdown_channel;
use lake::error::ErrorKind;
use lake::hash::chunk_of;
use lake::layout::organized;
use lake::reorg::{ChunkOutcome, MergeOptions, StreamingChunkMerger};
use lake::test_utils::{RawFixture, date, entity_ids, observation, weekly_dates};
use lake::types::{ChunkId, Observation};
use lake_telemetry::tracing::init_test_tracing;
use tempfile::TempDir;

fn options(chunk_count: u32) -> MergeOptions {
    let mut options = MergeOptions::new(chunk_count);
    options.workers = 2;
    options
}

fn read_chunks(organized_dir: &Path, chunk_count: u32) -> Vec<Vec<Observation>> {
    ChunkId::all(chunk_count)
        .map(|chunk| {
            codec::read_observations(&organized::chunk_file(organized_dir, chunk), 1024).unwrap()
        })
        .collect()
}

fn pairs(records: &[Observation]) -> BTreeSet<(String, NaiveDate)> {
    records
        .iter()
        .map(|record| (record.parcel_id.clone(), record.date))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn every_raw_pair_lands_in_exactly_one_chunk() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    let dates = weekly_dates(date(2024, 1, 1), 3);
    fixture.write_grid("32TNR", &entity_ids("nr", 25), &dates);
    fixture.write_grid("32TPR", &entity_ids("pr", 15), &dates);

    let (_tx, rx) = create_shutdown_channel();
    let merger = StreamingChunkMerger::new(raw.path(), organized.path(), options(4), rx).unwrap();
    let summary = merger.run().await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.created, 4);
    assert_eq!(summary.rows_read, 120);
    assert_eq!(summary.rows_written, 120);
    assert_eq!(summary.duplicates_removed, 0);

    let mut raw_pairs = BTreeSet::new();
    for tile in ["32TNR", "32TPR"] {
        for date in &dates {
            let records =
                codec::read_observations(&fixture.partition_file(tile, *date), 1024).unwrap();
            raw_pairs.extend(pairs(&records));
        }
    }

    let mut chunk_pairs = BTreeSet::new();
    for (index, records) in read_chunks(organized.path(), 4).into_iter().enumerate() {
        for record in &records {
            assert_eq!(
                chunk_of(&record.parcel_id, 4).unwrap(),
                ChunkId(index as u32)
            );
        }
        let chunk = pairs(&records);
        assert_eq!(chunk.len(), records.len());
        assert!(chunk_pairs.is_disjoint(&chunk));
        chunk_pairs.extend(chunk);
    }

    assert_eq!(chunk_pairs, raw_pairs);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_records_keep_the_last_observed() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    let day = date(2024, 1, 1);

    fixture.write_partition(
        "32TNR",
        day,
        &[
            observation("p1", day, 1.0),
            observation("p2", day, 5.0),
            observation("p1", day, 2.0),
        ],
    );
    // Tiles sort after one another, so this file is scanned last.
    fixture.write_partition("32TPR", day, &[observation("p2", day, 6.0)]);

    let (_tx, rx) = create_shutdown_channel();
    let merger = StreamingChunkMerger::new(raw.path(), organized.path(), options(2), rx).unwrap();
    let summary = merger.run().await.unwrap();

    assert_eq!(summary.rows_read, 4);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.duplicates_removed, 2);

    let records: Vec<_> = read_chunks(organized.path(), 2).concat();
    let p1: Vec<_> = records.iter().filter(|r| r.parcel_id == "p1").collect();
    let p2: Vec<_> = records.iter().filter(|r| r.parcel_id == "p2").collect();
    assert_eq!(p1.len(), 1);
    assert_eq!(p1[0].measurements.ndvi, 2.0);
    assert_eq!(p2.len(), 1);
    assert_eq!(p2[0].measurements.ndvi, 6.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_chunks_are_skipped_unless_forced() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid(
        "32TNR",
        &entity_ids("p", 30),
        &weekly_dates(date(2024, 1, 1), 2),
    );

    let (_tx, rx) = create_shutdown_channel();
    let first = StreamingChunkMerger::new(raw.path(), organized.path(), options(3), rx.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(first.created, 3);
    let before = read_chunks(organized.path(), 3);

    let second = StreamingChunkMerger::new(raw.path(), organized.path(), options(3), rx.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.rows_read, 0);

    let mut forced = options(3);
    forced.force = true;
    let third = StreamingChunkMerger::new(raw.path(), organized.path(), forced, rx)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(third.created, 3);
    assert_eq!(read_chunks(organized.path(), 3), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_chunk_output_is_recreated() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid("32TNR", &entity_ids("p", 20), &[date(2024, 1, 1)]);

    let (_tx, rx) = create_shutdown_channel();
    StreamingChunkMerger::new(raw.path(), organized.path(), options(2), rx.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    std::fs::write(organized::chunk_file(organized.path(), ChunkId(1)), b"garbage").unwrap();

    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), options(2), rx)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.created, 1);
    assert!(matches!(
        summary.chunks[&ChunkId(1)],
        ChunkOutcome::Created { .. }
    ));
    assert!(organized::inspect_chunk(organized.path(), ChunkId(1)).is_valid());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_inputs_are_skipped_or_abort_when_fail_fast() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    let dates = weekly_dates(date(2024, 1, 1), 2);
    fixture.write_grid("32TNR", &entity_ids("p", 10), &dates);
    let corrupt = fixture.write_corrupt("32TPR", dates[0]);

    let (_tx, rx) = create_shutdown_channel();

    let organized = TempDir::new().unwrap();
    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), options(2), rx.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.rows_written, 20);
    assert_eq!(summary.skipped_inputs.len(), 1);
    assert_eq!(summary.skipped_inputs[0].path, corrupt);

    let organized = TempDir::new().unwrap();
    let mut fail_fast = options(2);
    fail_fast.fail_fast = true;
    let err = StreamingChunkMerger::new(raw.path(), organized.path(), fail_fast, rx)
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputReadError);
    assert!(!organized::staging_dir(organized.path()).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_spill_only_fails_its_chunk() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    let entities = entity_ids("parcel", 40);
    fixture.write_grid("32TNS", &entities, &weekly_dates(date(2024, 1, 1), 4));

    // Run files cannot be created below a regular file.
    std::fs::write(organized::staging_dir(organized.path()), b"in the way").unwrap();

    let mut options = options(4);
    options.max_buffered_rows = 30;
    let (_tx, rx) = create_shutdown_channel();
    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), options, rx)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!summary.is_complete());
    assert!(summary.failed >= 1);
    assert_eq!(summary.created + summary.failed, 4);
    assert_eq!(summary.rows_read, 160);

    for (chunk, outcome) in &summary.chunks {
        match outcome {
            ChunkOutcome::Failed { reason } => {
                assert!(reason.contains("could not be spilled"), "{reason}");
                assert!(!organized::chunk_file(organized.path(), *chunk).exists());
            }
            ChunkOutcome::Created { rows, .. } => {
                let expected = entities
                    .iter()
                    .filter(|id| chunk_of(id, 4).unwrap() == *chunk)
                    .count() as u64
                    * 4;
                assert_eq!(*rows, expected);
                assert!(organized::chunk_file(organized.path(), *chunk).exists());
            }
            other => panic!("chunk {chunk} ended as {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_reads_and_writes_nothing() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid("32TNR", &entity_ids("p", 10), &[date(2024, 1, 1)]);

    let mut dry_run = options(4);
    dry_run.dry_run = true;
    let (_tx, rx) = create_shutdown_channel();
    let summary = StreamingChunkMerger::new(raw.path(), organized.path(), dry_run, rx)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert!(!summary.is_complete());
    assert_eq!(summary.inputs, 1);
    assert_eq!(summary.rows_read, 0);
    assert!(
        summary
            .chunks
            .values()
            .all(|outcome| matches!(outcome, ChunkOutcome::Planned))
    );
    assert!(std::fs::read_dir(organized.path()).unwrap().next().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_run_leaves_no_staging() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid("32TNR", &entity_ids("p", 10), &[date(2024, 1, 1)]);

    let (tx, rx) = create_shutdown_channel();
    tx.shutdown();
    let err = StreamingChunkMerger::new(raw.path(), organized.path(), options(2), rx)
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!organized::staging_dir(organized.path()).exists());
}
