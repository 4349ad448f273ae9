use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span};

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::LakeResult;
use crate::hash::EntityHasher;
use crate::layout::organized;
use crate::table::base::TableStore;
use crate::types::ChunkId;
use crate::validate::ValidatorOptions;
use crate::validate::chunks::{ChunkProfile, ChunkScan, ExclusivityTracker, push_skew_finding};
use crate::validate::expected::ExpectedDates;
use crate::validate::report::{FindingKind, Representation, ValidationReport};
use crate::workers::pool::ChunkWorkerPool;

/// Checks the committed table: partition structure, then completeness and exclusivity of every
/// readable partition.
///
/// With `cross_check_dir` set, each partition's row count is compared with the organized chunk
/// it was committed from.
pub async fn check_table<S>(
    store: &S,
    hasher: EntityHasher,
    expected: Arc<ExpectedDates>,
    cross_check_dir: Option<&Path>,
    options: &ValidatorOptions,
    shutdown_rx: &ShutdownRx,
) -> LakeResult<ValidationReport>
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    let mut report = ValidationReport::new(Representation::Table);

    let mut present = BTreeSet::new();
    for entry in store.list_partitions().await? {
        match entry.chunk {
            Some(chunk) if chunk.0 < hasher.chunk_count() => {
                present.insert(chunk);
            }
            _ => report.push(FindingKind::UnexpectedPartition { name: entry.name }),
        }
    }

    for chunk in ChunkId::all(hasher.chunk_count()) {
        if !present.contains(&chunk) {
            report.push(FindingKind::MissingPartition { chunk });
        }
    }

    info!(
        store = S::name(),
        partitions = present.len(),
        chunk_count = hasher.chunk_count(),
        "checking table partitions"
    );

    let mut pool: ChunkWorkerPool<ChunkScan> = ChunkWorkerPool::new(options.workers);
    for chunk in present.iter().copied() {
        let store = store.clone();
        let expected = expected.clone();
        let shutdown_rx = shutdown_rx.clone();
        let span = info_span!("check_partition", %chunk);
        pool.spawn(
            chunk,
            async move {
                shutdown_rx.check()?;
                let records = store.read_partition(chunk).await?;
                let scan = tokio::task::spawn_blocking(move || {
                    let mut profile = ChunkProfile::default();
                    profile.add(&records);
                    profile.finish(chunk, &hasher, &expected)
                })
                .await?;
                Ok(scan)
            }
            .instrument(span),
        )?;
    }

    let mut tracker = ExclusivityTracker::default();
    for (chunk, result) in pool.join_all().await {
        let scan = match result {
            Ok(scan) => scan,
            Err(err) => {
                report.push(FindingKind::CorruptPartition {
                    chunk,
                    reason: err.reason(),
                });
                continue;
            }
        };

        debug!(%chunk, rows = scan.rows, entities = scan.entities.len(), "checked partition");
        report.stats.chunks += 1;
        report.stats.rows += scan.rows;

        if let Some(organized_dir) = cross_check_dir {
            cross_check(
                &mut report,
                organized_dir,
                chunk,
                scan.rows,
                options.batch_size,
            )
            .await?;
        }

        for finding in scan.findings {
            report.push(finding);
        }
        for overlap in tracker.observe(chunk, scan.entities) {
            report.push(overlap);
        }
    }

    shutdown_rx.check()?;

    for chunk in &present {
        report.stats.files += store
            .partition_files(*chunk)
            .await
            .map(|files| files.len() as u64)
            .unwrap_or_default();
    }

    push_skew_finding(
        &mut report,
        tracker.skew(),
        options.skew_threshold,
        options.skew_fail_threshold,
    );

    report.stats.entities = tracker.distinct_entities();
    report.stats.dates = expected.len() as u64;
    report.sort();

    Ok(report)
}

/// Compares the partition row count with the distinct `(parcel_id, date)` pairs of the
/// organized chunk, when the chunk exists. Duplicates are dropped on commit.
async fn cross_check(
    report: &mut ValidationReport,
    organized_dir: &Path,
    chunk: ChunkId,
    table_rows: u64,
    batch_size: usize,
) -> LakeResult<()> {
    let path: PathBuf = organized::chunk_file(organized_dir, chunk);
    if !path.is_file() {
        return Ok(());
    }

    let organized_rows =
        tokio::task::spawn_blocking(move || distinct_pairs(&path, batch_size)).await?;
    match organized_rows {
        Ok(organized_rows) if organized_rows != table_rows => {
            report.push(FindingKind::RowCountMismatch {
                chunk,
                organized: organized_rows,
                table: table_rows,
            });
        }
        Ok(_) => {}
        Err(err) => {
            debug!(%chunk, error = %err, "organized chunk unreadable, skipping cross-check");
        }
    }

    Ok(())
}

fn distinct_pairs(path: &Path, batch_size: usize) -> LakeResult<u64> {
    let mut pairs = HashSet::new();
    for batch in codec::open_reader(path, batch_size)? {
        pairs.extend(
            batch?
                .into_iter()
                .map(|record| (record.parcel_id, record.date)),
        );
    }

    Ok(pairs.len() as u64)
}
