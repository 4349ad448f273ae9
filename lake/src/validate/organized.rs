use std::path::Path;
use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span};

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::LakeResult;
use crate::hash::EntityHasher;
use crate::layout::organized;
use crate::types::ChunkId;
use crate::validate::chunks::{ChunkProfile, ChunkScan, ExclusivityTracker, push_skew_finding};
use crate::validate::expected::ExpectedDates;
use crate::validate::ValidatorOptions;
use crate::validate::report::{FindingKind, Representation, ValidationReport};
use crate::workers::pool::ChunkWorkerPool;

/// Checks completeness and exclusivity of the organized chunk files under `organized_dir`.
///
/// Every chunk is profiled by its own worker. Results are then folded in chunk order into the
/// global entity map, so overlap findings do not depend on which worker finished first.
pub async fn check_organized(
    organized_dir: &Path,
    hasher: EntityHasher,
    expected: Arc<ExpectedDates>,
    options: &ValidatorOptions,
    shutdown_rx: &ShutdownRx,
) -> LakeResult<ValidationReport> {
    let mut report = ValidationReport::new(Representation::Organized);

    if !organized_dir.is_dir() {
        report.push(FindingKind::EmptyRepresentation {
            reason: format!(
                "organized directory {} does not exist",
                organized_dir.display()
            ),
        });
        return Ok(report);
    }

    for entry in organized::list_chunk_dirs(organized_dir)? {
        match entry.chunk {
            Some(chunk) if chunk.0 < hasher.chunk_count() => {}
            _ => report.push(FindingKind::UnexpectedPartition { name: entry.name }),
        }
    }

    info!(
        chunk_count = hasher.chunk_count(),
        expected_dates = expected.len(),
        "checking organized chunks"
    );

    let mut pool: ChunkWorkerPool<ChunkScan> = ChunkWorkerPool::new(options.workers);
    for chunk in ChunkId::all(hasher.chunk_count()) {
        let path = organized::chunk_file(organized_dir, chunk);
        if !path.is_file() {
            report.push(FindingKind::MissingChunkFile { chunk });
            continue;
        }

        let expected = expected.clone();
        let batch_size = options.batch_size;
        let shutdown_rx = shutdown_rx.clone();
        let span = info_span!("check_chunk", %chunk);
        pool.spawn(
            chunk,
            async move {
                shutdown_rx.check()?;
                tokio::task::spawn_blocking(move || -> LakeResult<ChunkScan> {
                    let mut profile = ChunkProfile::default();
                    for batch in codec::open_reader(&path, batch_size)? {
                        profile.add(&batch?);
                    }
                    Ok(profile.finish(chunk, &hasher, &expected))
                })
                .await?
            }
            .instrument(span),
        )?;
    }

    let mut tracker = ExclusivityTracker::default();
    for (chunk, result) in pool.join_all().await {
        let scan = match result {
            Ok(scan) => scan,
            Err(err) => {
                report.push(FindingKind::UnreadableInput {
                    path: organized::chunk_file(organized_dir, chunk),
                    reason: err.reason(),
                });
                continue;
            }
        };

        debug!(%chunk, rows = scan.rows, entities = scan.entities.len(), "checked chunk");
        report.stats.files += 1;
        report.stats.chunks += 1;
        report.stats.rows += scan.rows;
        for finding in scan.findings {
            report.push(finding);
        }
        for overlap in tracker.observe(chunk, scan.entities) {
            report.push(overlap);
        }
    }

    shutdown_rx.check()?;

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
