use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use lake::concurrency::shutdown::create_shutdown_channel;
use lake::hash::chunk_of;
use lake::reorg::{MergeOptions, StreamingChunkMerger};
use lake::table::file::FileTableStore;
use lake::table::{CommitOptions, MemoryTableStore, TableCommitter, TableStore};
use lake::test_utils::{RawFixture, date, entity_ids, observation, weekly_dates, write_chunk_file};
use lake::types::{ChunkId, Observation};
use lake::validate::{
    FindingKind, Representation, ValidationReport, Validator, ValidatorOptions,
};
use lake_config::shared::{ExpectedDatesConfig, ValidationTarget};
use lake_telemetry::tracing::init_test_tracing;
use tempfile::TempDir;

fn explicit_dates(dates: &[NaiveDate]) -> ExpectedDatesConfig {
    ExpectedDatesConfig::Explicit {
        dates: dates.to_vec(),
    }
}

/// Groups a full `entities x dates` grid by the chunk each entity hashes to.
fn grid_by_chunk(
    entities: &[String],
    dates: &[NaiveDate],
    chunk_count: u32,
) -> BTreeMap<ChunkId, Vec<Observation>> {
    let mut chunks: BTreeMap<ChunkId, Vec<Observation>> = ChunkId::all(chunk_count)
        .map(|chunk| (chunk, Vec::new()))
        .collect();
    for (e, entity) in entities.iter().enumerate() {
        let chunk = chunk_of(entity, chunk_count).unwrap();
        for (d, date) in dates.iter().enumerate() {
            chunks
                .get_mut(&chunk)
                .unwrap()
                .push(observation(entity, *date, (e * 1000 + d) as f64));
        }
    }
    chunks
}

async fn run_suite<S>(
    options: ValidatorOptions,
    store: S,
    target: ValidationTarget,
) -> ValidationReport
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    let (_tx, rx) = create_shutdown_channel();
    let summary = Validator::new(options, store, rx)
        .run(&[target])
        .await
        .unwrap();
    summary.reports.into_iter().next().unwrap()
}

async fn reorganize(raw_dir: &Path, organized_dir: &Path, chunk_count: u32) {
    let (_tx, rx) = create_shutdown_channel();
    let summary = StreamingChunkMerger::new(
        raw_dir,
        organized_dir,
        MergeOptions::new(chunk_count),
        rx,
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    assert!(summary.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_reorganization_has_no_findings() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid(
        "32TNR",
        &entity_ids("p", 3),
        &weekly_dates(date(2024, 1, 1), 2),
    );
    reorganize(raw.path(), organized.path(), 2).await;

    let options = ValidatorOptions::new(raw.path().into(), organized.path().into(), 2);
    let report = run_suite(options, MemoryTableStore::new(), ValidationTarget::Organized).await;

    assert!(report.passed());
    assert!(report.findings.is_empty(), "{}", report.render(true));
    assert_eq!(report.stats.entities, 3);
    assert_eq!(report.stats.rows, 6);
    assert_eq!(report.stats.dates, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn entity_in_two_chunks_is_one_overlap() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let dates = weekly_dates(date(2024, 1, 1), 2);
    let mut chunks = grid_by_chunk(&entity_ids("p", 12), &dates, 2);

    let stolen: Vec<Observation> = {
        let first = &chunks[&ChunkId(0)][0].parcel_id;
        chunks[&ChunkId(0)]
            .iter()
            .filter(|record| &record.parcel_id == first)
            .cloned()
            .collect()
    };
    let entity = stolen[0].parcel_id.clone();
    chunks.get_mut(&ChunkId(1)).unwrap().extend(stolen);

    for (chunk, records) in &chunks {
        write_chunk_file(organized.path(), *chunk, records);
    }

    let mut options =
        ValidatorOptions::new(organized.path().join("raw"), organized.path().into(), 2);
    options.expected_dates = explicit_dates(&dates);
    let report = run_suite(options, MemoryTableStore::new(), ValidationTarget::Organized).await;

    assert!(!report.passed());
    let overlaps: Vec<_> = report.findings_of("parcel_overlap").collect();
    assert_eq!(overlaps.len(), 1);
    assert_eq!(
        overlaps[0].kind,
        FindingKind::ParcelOverlap {
            entity: entity.clone(),
            chunk_a: ChunkId(0),
            chunk_b: ChunkId(1),
        }
    );
    assert_eq!(report.findings_of("misrouted_entity").count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn partially_present_entity_reports_missing_dates() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let dates = weekly_dates(date(2024, 1, 1), 3);
    let mut chunks = grid_by_chunk(&entity_ids("p", 8), &dates, 1);

    let records = chunks.get_mut(&ChunkId(0)).unwrap();
    let entity = records[0].parcel_id.clone();
    records.remove(0);
    write_chunk_file(organized.path(), ChunkId(0), records);

    let mut options =
        ValidatorOptions::new(organized.path().join("raw"), organized.path().into(), 1);
    options.expected_dates = explicit_dates(&dates);
    let report = run_suite(options, MemoryTableStore::new(), ValidationTarget::Organized).await;

    assert_eq!(report.error_count(), 1);
    assert_eq!(
        report.findings[0].kind,
        FindingKind::MissingDates {
            entity,
            chunk: ChunkId(0),
            missing_count: 1,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_and_foreign_chunk_dirs_are_reported() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let dates = [date(2024, 1, 1)];
    let chunks = grid_by_chunk(&entity_ids("p", 10), &dates, 3);
    write_chunk_file(organized.path(), ChunkId(0), &chunks[&ChunkId(0)]);
    write_chunk_file(organized.path(), ChunkId(2), &chunks[&ChunkId(2)]);
    fs::create_dir_all(organized.path().join("parcel_chunk=07")).unwrap();

    let mut options =
        ValidatorOptions::new(organized.path().join("raw"), organized.path().into(), 3);
    options.expected_dates = explicit_dates(&dates);
    let report = run_suite(options, MemoryTableStore::new(), ValidationTarget::Organized).await;

    let missing: Vec<_> = report.findings_of("missing_chunk_file").collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].kind, FindingKind::MissingChunkFile { chunk: ChunkId(1) });
    assert_eq!(report.findings_of("unexpected_partition").count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_table_partition_is_isolated() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let organized = TempDir::new().unwrap();
    let table = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    fixture.write_grid(
        "32TNR",
        &entity_ids("p", 30),
        &weekly_dates(date(2024, 1, 1), 2),
    );
    reorganize(raw.path(), organized.path(), 3).await;

    let store = FileTableStore::open(table.path(), 1_000_000).unwrap();
    let (_tx, rx) = create_shutdown_channel();
    let summary = TableCommitter::new(store.clone(), CommitOptions::default(), rx)
        .commit_organized(organized.path(), 3)
        .await
        .unwrap();
    assert!(summary.is_complete());

    let files = store.partition_files(ChunkId(1)).await.unwrap();
    fs::write(&files[0].path, b"not parquet").unwrap();

    let options = ValidatorOptions::new(raw.path().into(), organized.path().into(), 3);
    let report = run_suite(options, store, ValidationTarget::Table).await;

    assert_eq!(report.representation, Representation::Table);
    assert_eq!(report.error_count(), 1, "{}", report.render(true));
    let corrupt: Vec<_> = report.findings_of("corrupt_partition").collect();
    assert_eq!(corrupt.len(), 1);
    assert!(matches!(
        corrupt[0].kind,
        FindingKind::CorruptPartition { chunk: ChunkId(1), .. }
    ));
    assert_eq!(report.stats.chunks, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn table_structure_matches_chunk_range() {
    init_test_tracing();
    let dates = [date(2024, 1, 1)];
    let store = MemoryTableStore::new();
    let (_tx, rx) = create_shutdown_channel();
    let committer = TableCommitter::new(store.clone(), CommitOptions::default(), rx);
    for (chunk, records) in grid_by_chunk(&entity_ids("p", 10), &dates, 3) {
        committer.commit_partition(chunk, records).await.unwrap();
    }
    store.drop_partition(ChunkId(2)).await;
    store.add_unexpected_partition("parcel_chunk=misc").await;

    let dir = TempDir::new().unwrap();
    let mut options = ValidatorOptions::new(dir.path().join("raw"), dir.path().join("org"), 3);
    options.expected_dates = explicit_dates(&dates);
    let report = run_suite(options, store, ValidationTarget::Table).await;

    assert_eq!(
        report.findings_of("missing_partition").next().map(|f| &f.kind),
        Some(&FindingKind::MissingPartition { chunk: ChunkId(2) })
    );
    assert_eq!(report.findings_of("unexpected_partition").count(), 1);
    assert_eq!(report.findings_of("missing_dates").count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_check_flags_row_count_drift() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let dates = weekly_dates(date(2024, 1, 1), 2);
    let chunks = grid_by_chunk(&entity_ids("p", 6), &dates, 1);
    let records = &chunks[&ChunkId(0)];
    write_chunk_file(organized.path(), ChunkId(0), records);

    let store = MemoryTableStore::new();
    let (_tx, rx) = create_shutdown_channel();
    TableCommitter::new(store.clone(), CommitOptions::default(), rx)
        .commit_partition(ChunkId(0), records[..records.len() - 2].to_vec())
        .await
        .unwrap();

    let mut options =
        ValidatorOptions::new(organized.path().join("raw"), organized.path().into(), 1);
    options.expected_dates = explicit_dates(&dates);
    options.cross_check = true;
    let report = run_suite(options, store, ValidationTarget::Table).await;

    let table_rows = records.len() as u64 - 2;
    assert!(report.findings.iter().any(|finding| finding.kind
        == FindingKind::RowCountMismatch {
            chunk: ChunkId(0),
            organized: records.len() as u64,
            table: table_rows,
        }));
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_check_ignores_duplicates_dropped_on_commit() {
    init_test_tracing();
    let organized = TempDir::new().unwrap();
    let day = date(2024, 1, 1);
    write_chunk_file(
        organized.path(),
        ChunkId(0),
        &[
            observation("p1", day, 1.0),
            observation("p1", day, 2.0),
            observation("p2", day, 3.0),
        ],
    );

    let store = MemoryTableStore::new();
    let (_tx, rx) = create_shutdown_channel();
    let summary = TableCommitter::new(store.clone(), CommitOptions::default(), rx)
        .commit_organized(organized.path(), 1)
        .await
        .unwrap();
    assert_eq!(summary.rows_committed, 2);

    let mut options =
        ValidatorOptions::new(organized.path().join("raw"), organized.path().into(), 1);
    options.expected_dates = explicit_dates(&[day]);
    options.cross_check = true;
    let report = run_suite(options, store, ValidationTarget::Table).await;

    assert_eq!(report.findings_of("row_count_mismatch").count(), 0);
    assert!(report.passed(), "{}", report.render(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn entity_in_two_partitions_is_one_overlap() {
    init_test_tracing();
    let dates = weekly_dates(date(2024, 1, 1), 2);
    let mut chunks = grid_by_chunk(&entity_ids("p", 12), &dates, 2);

    let stolen: Vec<Observation> = {
        let first = &chunks[&ChunkId(0)][0].parcel_id;
        chunks[&ChunkId(0)]
            .iter()
            .filter(|record| &record.parcel_id == first)
            .cloned()
            .collect()
    };
    let entity = stolen[0].parcel_id.clone();
    chunks.get_mut(&ChunkId(1)).unwrap().extend(stolen);

    let store = MemoryTableStore::new();
    let (_tx, rx) = create_shutdown_channel();
    let committer = TableCommitter::new(store.clone(), CommitOptions::default(), rx);
    for (chunk, records) in chunks {
        committer.commit_partition(chunk, records).await.unwrap();
    }

    let dir = TempDir::new().unwrap();
    let mut options = ValidatorOptions::new(dir.path().join("raw"), dir.path().join("org"), 2);
    options.expected_dates = explicit_dates(&dates);
    let report = run_suite(options, store, ValidationTarget::Table).await;

    assert!(!report.passed());
    let overlaps: Vec<_> = report.findings_of("parcel_overlap").collect();
    assert_eq!(overlaps.len(), 1);
    assert_eq!(
        overlaps[0].kind,
        FindingKind::ParcelOverlap {
            entity: entity.clone(),
            chunk_a: ChunkId(0),
            chunk_b: ChunkId(1),
        }
    );

    let misrouted: Vec<_> = report.findings_of("misrouted_entity").collect();
    assert_eq!(misrouted.len(), 1);
    assert_eq!(
        misrouted[0].kind,
        FindingKind::MisroutedEntity {
            entity,
            chunk: ChunkId(1),
            expected_chunk: ChunkId(0),
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_tiles_are_checked_against_the_expected_population() {
    init_test_tracing();
    let raw = TempDir::new().unwrap();
    let fixture = RawFixture::new(raw.path());
    let dates = weekly_dates(date(2024, 1, 1), 2);
    fixture.write_grid("32TNR", &entity_ids("nr", 5), &dates);
    fixture.write_grid("32TPR", &entity_ids("pr", 4), &dates);

    let mut options = ValidatorOptions::new(raw.path().into(), raw.path().join("org"), 2);
    options.expected_entities_per_tile = Some(5);
    let report = run_suite(options, MemoryTableStore::new(), ValidationTarget::Raw).await;

    assert_eq!(report.error_count(), 1);
    assert_eq!(
        report.findings[0].kind,
        FindingKind::UnexpectedEntityCount {
            tile: "32TPR".to_string(),
            expected: 5,
            found: 4,
        }
    );
    assert_eq!(report.stats.files, 4);
    assert_eq!(report.stats.entities, 9);

    let summary_line = report.render(false);
    assert!(summary_line.starts_with("[raw] FAILED"));
    assert!(!summary_line.contains("32TPR"));
    assert!(report.render(true).contains("32TPR"));
}
