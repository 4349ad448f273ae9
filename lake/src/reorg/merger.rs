use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lake_config::shared::ReorgConfig;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, LakeError, LakeResult};
use crate::failpoints::{REORG_FLUSH_CHUNK, lake_fail_point};
use crate::hash::{EntityHasher, SkewStats};
use crate::lake_error;
use crate::layout::organized::{self, ExistingOutput};
use crate::layout::raw::{RawInput, RawLayout, RejectedPath};
use crate::reorg::dedup::{Deduplicator, ScanPosition, ScannedRecord};
use crate::reorg::spill::{self, ChunkAccumulator};
use crate::types::{ChunkId, Observation};
use crate::workers::pool::{ChunkWorkerPool, WorkerPool};

/// Delay before the second flush attempt of a chunk; doubles for every further attempt.
const FLUSH_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Tuning of a reorganize run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub chunk_count: u32,
    /// Rows per read batch.
    pub batch_size: usize,
    /// Rows held in memory across all chunk buffers before the largest buffer is spilled.
    pub max_buffered_rows: usize,
    pub max_flush_attempts: u32,
    pub force: bool,
    pub fail_fast: bool,
    pub dry_run: bool,
    pub skew_threshold: f64,
    pub workers: usize,
}

impl MergeOptions {
    pub fn new(chunk_count: u32) -> Self {
        Self {
            chunk_count,
            batch_size: 8192,
            max_buffered_rows: 500_000,
            max_flush_attempts: 3,
            force: false,
            fail_fast: false,
            dry_run: false,
            skew_threshold: 1.5,
            workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
        }
    }

    /// Builds options from configuration once the chunk count has been resolved.
    pub fn from_config(config: &ReorgConfig, chunk_count: u32, workers: usize) -> Self {
        Self {
            chunk_count,
            batch_size: config.batch_size,
            max_buffered_rows: config.max_buffered_rows,
            max_flush_attempts: config.max_flush_attempts,
            force: config.force,
            fail_fast: config.fail_fast,
            dry_run: config.dry_run,
            skew_threshold: config.skew_threshold,
            workers,
        }
    }
}

/// What a run will do before any data is read.
#[derive(Debug, Clone)]
pub struct ReorgPlan {
    pub layout: RawLayout,
    pub chunk_count: u32,
    pub to_create: Vec<ChunkId>,
    pub to_skip: Vec<ChunkId>,
}

/// Result for one chunk of a reorganize run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Created { rows: u64, entities: u64 },
    /// A valid output already existed and `force` was not set.
    Skipped,
    /// Would be created; only reported by dry runs.
    Planned,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorgSummary {
    pub total_chunks: u32,
    pub inputs: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: BTreeMap<ChunkId, ChunkOutcome>,
    pub skipped_inputs: Vec<RejectedPath>,
    pub rows_read: u64,
    pub rows_written: u64,
    pub duplicates_removed: u64,
    pub skew: Option<SkewStats>,
    pub dry_run: bool,
}

impl ReorgSummary {
    fn new(plan: &ReorgPlan, dry_run: bool) -> Self {
        let mut chunks = BTreeMap::new();
        for chunk in &plan.to_skip {
            chunks.insert(*chunk, ChunkOutcome::Skipped);
        }
        for chunk in &plan.to_create {
            chunks.insert(*chunk, ChunkOutcome::Planned);
        }

        Self {
            total_chunks: plan.chunk_count,
            inputs: plan.layout.inputs().len(),
            created: 0,
            skipped: plan.to_skip.len(),
            failed: 0,
            chunks,
            skipped_inputs: plan.layout.rejected().to_vec(),
            rows_read: 0,
            rows_written: 0,
            duplicates_removed: 0,
            skew: None,
            dry_run,
        }
    }

    pub fn failed_chunks(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ChunkOutcome::Failed { .. }))
            .map(|(chunk, _)| *chunk)
            .collect()
    }

    /// Whether every chunk now has an output.
    pub fn is_complete(&self) -> bool {
        !self.dry_run && self.failed == 0
    }
}

/// Flushed state of one chunk.
#[derive(Debug, Clone, Copy)]
struct ChunkFlush {
    rows: u64,
    entities: u64,
    duplicates_removed: u64,
}

/// Re-keys the raw date-partitioned layout into hash chunks of entities.
///
/// Inputs are read in parallel, one task per raw file, and each record is routed to its chunk
/// buffer tagged with its scan position. Buffers beyond the memory limit are spilled to run
/// files under the staging directory. Once every input was scanned, each chunk is deduplicated
/// and written by its own worker.
#[derive(Debug)]
pub struct StreamingChunkMerger {
    raw_dir: PathBuf,
    organized_dir: PathBuf,
    hasher: EntityHasher,
    options: MergeOptions,
    shutdown_rx: ShutdownRx,
}

impl StreamingChunkMerger {
    pub fn new(
        raw_dir: impl Into<PathBuf>,
        organized_dir: impl Into<PathBuf>,
        options: MergeOptions,
        shutdown_rx: ShutdownRx,
    ) -> LakeResult<Self> {
        let hasher = EntityHasher::new(options.chunk_count)?;

        Ok(Self {
            raw_dir: raw_dir.into(),
            organized_dir: organized_dir.into(),
            hasher,
            options,
            shutdown_rx,
        })
    }

    /// Discovers the inputs and decides which chunks to create.
    pub fn plan(&self) -> LakeResult<ReorgPlan> {
        let layout = RawLayout::discover(&self.raw_dir)?;

        let mut to_create = Vec::new();
        let mut to_skip = Vec::new();
        for chunk in ChunkId::all(self.hasher.chunk_count()) {
            match organized::inspect_chunk(&self.organized_dir, chunk) {
                ExistingOutput::Valid { rows } if !self.options.force => {
                    debug!(%chunk, rows, "chunk output exists, skipping");
                    to_skip.push(chunk);
                }
                ExistingOutput::Corrupt { reason } => {
                    warn!(%chunk, %reason, "existing chunk output is unreadable, recreating");
                    to_create.push(chunk);
                }
                _ => to_create.push(chunk),
            }
        }

        Ok(ReorgPlan {
            layout,
            chunk_count: self.hasher.chunk_count(),
            to_create,
            to_skip,
        })
    }

    pub async fn run(&self) -> LakeResult<ReorgSummary> {
        let plan = self.plan()?;
        let mut summary = ReorgSummary::new(&plan, self.options.dry_run);

        info!(
            inputs = plan.layout.inputs().len(),
            chunk_count = plan.chunk_count,
            to_create = plan.to_create.len(),
            to_skip = plan.to_skip.len(),
            dry_run = self.options.dry_run,
            "starting reorganize"
        );

        if self.options.dry_run {
            return Ok(summary);
        }

        if plan.to_create.is_empty() {
            info!("every chunk already has an output, nothing to read");
            return Ok(summary);
        }

        fs::create_dir_all(&self.organized_dir)?;
        let staging = organized::staging_dir(&self.organized_dir);
        remove_staging(&staging);

        let result = self.merge(&plan, &staging, &mut summary).await;
        remove_staging(&staging);
        result?;

        self.shutdown_rx.check()?;

        info!(
            created = summary.created,
            skipped = summary.skipped,
            failed = summary.failed,
            skipped_inputs = summary.skipped_inputs.len(),
            rows_read = summary.rows_read,
            rows_written = summary.rows_written,
            duplicates_removed = summary.duplicates_removed,
            "reorganize finished"
        );

        Ok(summary)
    }

    async fn merge(
        &self,
        plan: &ReorgPlan,
        staging: &Path,
        summary: &mut ReorgSummary,
    ) -> LakeResult<()> {
        let mut accumulators: HashMap<ChunkId, ChunkAccumulator> = plan
            .to_create
            .iter()
            .map(|chunk| (*chunk, ChunkAccumulator::new(*chunk, staging)))
            .collect();

        self.scan(plan.layout.inputs(), &mut accumulators, summary)
            .await?;

        let mut accumulators: Vec<ChunkAccumulator> = accumulators.into_values().collect();
        accumulators.sort_by_key(ChunkAccumulator::chunk);
        self.flush_all(accumulators, summary).await;

        Ok(())
    }

    /// Reads every raw input and routes its records to the chunk accumulators.
    async fn scan(
        &self,
        inputs: &[RawInput],
        accumulators: &mut HashMap<ChunkId, ChunkAccumulator>,
        summary: &mut ReorgSummary,
    ) -> LakeResult<()> {
        let mut pool: WorkerPool<u32, Vec<Observation>> = WorkerPool::new(self.options.workers);
        let paths: HashMap<u32, &Path> = inputs
            .iter()
            .map(|input| (input.index, input.path.as_path()))
            .collect();

        let mut pending = inputs.iter();
        let mut buffered = 0usize;

        loop {
            while pool.len() < self.options.workers.max(1) {
                let Some(input) = pending.next() else {
                    break;
                };

                if let Err(err) = self.shutdown_rx.check() {
                    pool.abort_all().await;
                    return Err(err);
                }

                let path = input.path.clone();
                let batch_size = self.options.batch_size;
                let span = info_span!("read_input", input = input.index, path = %path.display());
                pool.spawn(
                    input.index,
                    async move {
                        tokio::task::spawn_blocking(move || {
                            codec::read_observations(&path, batch_size)
                        })
                        .await?
                    }
                    .instrument(span),
                )?;
            }

            let Some((index, result)) = pool.join_next().await else {
                break;
            };
            let path = paths.get(&index).copied().unwrap_or(Path::new(""));

            let records = match result {
                Ok(records) => records,
                Err(err) if self.options.fail_fast => {
                    pool.abort_all().await;
                    return Err(input_read_error(path, err));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable raw input");
                    summary.skipped_inputs.push(RejectedPath {
                        path: path.to_path_buf(),
                        reason: err.reason(),
                    });
                    continue;
                }
            };

            debug!(path = %path.display(), rows = records.len(), "routing raw input");
            summary.rows_read += records.len() as u64;
            buffered += self.route(index, path, records, accumulators)?;

            while buffered > self.options.max_buffered_rows {
                let Some(largest) = accumulators
                    .values_mut()
                    .filter(|accumulator| accumulator.buffered() > 0)
                    .max_by_key(|accumulator| accumulator.buffered())
                else {
                    break;
                };

                let chunk = largest.chunk();
                buffered -= largest.buffered();
                if let Err(err) = spill_buffer(largest).await {
                    error!(%chunk, error = %err, "chunk buffer could not be spilled, dropping chunk");
                    accumulators.remove(&chunk);
                    summary.chunks.insert(
                        chunk,
                        ChunkOutcome::Failed {
                            reason: err.reason(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    /// Routes the records of one input. Returns how many were buffered.
    fn route(
        &self,
        input: u32,
        path: &Path,
        records: Vec<Observation>,
        accumulators: &mut HashMap<ChunkId, ChunkAccumulator>,
    ) -> LakeResult<usize> {
        let mut buffered = 0;
        for (row, observation) in records.into_iter().enumerate() {
            let Ok(row) = u32::try_from(row) else {
                return Err(lake_error!(
                    ErrorKind::InputReadError,
                    "Raw input has too many rows",
                    path.display()
                ));
            };

            let chunk = self.hasher.chunk_of(&observation.parcel_id);
            // Skipped chunks keep their existing output; failed chunks take no more rows.
            if let Some(accumulator) = accumulators.get_mut(&chunk) {
                accumulator.push(ScannedRecord {
                    position: ScanPosition { input, row },
                    observation,
                });
                buffered += 1;
            }
        }

        Ok(buffered)
    }

    /// Deduplicates and writes every accumulated chunk, one worker per chunk.
    async fn flush_all(&self, accumulators: Vec<ChunkAccumulator>, summary: &mut ReorgSummary) {
        let mut pool: ChunkWorkerPool<ChunkFlush> = ChunkWorkerPool::new(self.options.workers);
        let context = Arc::new(FlushContext {
            organized_dir: self.organized_dir.clone(),
            batch_size: self.options.batch_size,
            max_attempts: self.options.max_flush_attempts.max(1),
            shutdown_rx: self.shutdown_rx.clone(),
        });

        for accumulator in accumulators {
            let chunk = accumulator.chunk();
            let context = context.clone();
            let span = info_span!("flush_chunk", %chunk);
            if let Err(err) = pool.spawn(
                chunk,
                async move { flush_chunk(&context, accumulator).await }.instrument(span),
            ) {
                summary.chunks.insert(
                    chunk,
                    ChunkOutcome::Failed {
                        reason: err.reason(),
                    },
                );
            }
        }

        let mut entity_counts = Vec::new();
        for (chunk, result) in pool.join_all().await {
            match result {
                Ok(flush) => {
                    summary.rows_written += flush.rows;
                    summary.duplicates_removed += flush.duplicates_removed;
                    entity_counts.push((chunk, flush.entities));
                    summary.chunks.insert(
                        chunk,
                        ChunkOutcome::Created {
                            rows: flush.rows,
                            entities: flush.entities,
                        },
                    );
                }
                Err(err) => {
                    error!(%chunk, error = %err, "chunk was not written");
                    summary.chunks.insert(
                        chunk,
                        ChunkOutcome::Failed {
                            reason: err.reason(),
                        },
                    );
                }
            }
        }

        summary.created = count_outcomes(summary, |outcome| {
            matches!(outcome, ChunkOutcome::Created { .. })
        });
        summary.failed = count_outcomes(summary, |outcome| {
            matches!(outcome, ChunkOutcome::Failed { .. })
        });

        summary.skew = SkewStats::from_counts(entity_counts);
        if let Some(skew) = summary.skew
            && skew.exceeds(self.options.skew_threshold)
        {
            warn!(
                chunk = %skew.max_chunk,
                entities = skew.max,
                mean = skew.mean,
                ratio = skew.ratio,
                threshold = self.options.skew_threshold,
                "chunk distribution is skewed"
            );
        }
    }
}

struct FlushContext {
    organized_dir: PathBuf,
    batch_size: usize,
    max_attempts: u32,
    shutdown_rx: ShutdownRx,
}

async fn flush_chunk(
    context: &FlushContext,
    accumulator: ChunkAccumulator,
) -> LakeResult<ChunkFlush> {
    context.shutdown_rx.check()?;

    let chunk = accumulator.chunk();
    let (buffer, runs) = accumulator.into_parts();
    let batch_size = context.batch_size;
    let output =
        tokio::task::spawn_blocking(move || merge_chunk(buffer, &runs, batch_size)).await??;

    let entities = output.entity_count();
    let duplicates_removed = output.duplicates_removed;
    let records = Arc::new(output.records);
    let path = organized::chunk_file(&context.organized_dir, chunk);

    let mut attempt = 1;
    loop {
        let attempt_records = records.clone();
        let attempt_path = path.clone();
        let result =
            tokio::task::spawn_blocking(move || write_chunk(&attempt_path, &attempt_records))
                .await?;

        match result {
            Ok(rows) => {
                debug!(%chunk, rows, entities, duplicates_removed, "chunk written");
                return Ok(ChunkFlush {
                    rows,
                    entities,
                    duplicates_removed,
                });
            }
            Err(err) if attempt < context.max_attempts => {
                let delay = FLUSH_RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                warn!(%chunk, attempt, ?delay, error = %err, "chunk flush failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(lake_error!(
                    ErrorKind::FlushError,
                    "Chunk flush failed",
                    format!("chunk {chunk} after {attempt} attempts: {}", err.reason()),
                    source: err
                ));
            }
        }
    }
}

/// Writes the buffered records of `accumulator` as its next run file.
async fn spill_buffer(accumulator: &mut ChunkAccumulator) -> LakeResult<()> {
    let chunk = accumulator.chunk();
    let spill_error = |err: LakeError| {
        lake_error!(
            ErrorKind::FlushError,
            "Chunk buffer could not be spilled",
            format!("chunk {chunk}: {}", err.reason()),
            source: err
        )
    };

    let (run_path, records) = accumulator.take_run().map_err(spill_error)?;
    debug!(%chunk, rows = records.len(), path = %run_path.display(), "spilling chunk buffer");

    tokio::task::spawn_blocking(move || spill::write_run(&run_path, &records))
        .await?
        .map_err(spill_error)
}

/// Merges the spilled runs and in-memory records of a chunk into deduplicated output.
fn merge_chunk(
    buffer: Vec<ScannedRecord>,
    runs: &[PathBuf],
    batch_size: usize,
) -> LakeResult<crate::reorg::dedup::DedupOutput> {
    let mut deduplicator = Deduplicator::new();
    for run in runs {
        deduplicator.extend(spill::read_run(run, batch_size)?);
    }
    deduplicator.extend(buffer);

    Ok(deduplicator.finish())
}

fn write_chunk(path: &Path, records: &[Observation]) -> LakeResult<u64> {
    lake_fail_point(REORG_FLUSH_CHUNK, ErrorKind::FlushError)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    codec::write_observations_atomic(path, records)
}

fn remove_staging(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %staging.display(), error = %err, "failed to remove staging directory");
    }
}

fn count_outcomes(summary: &ReorgSummary, predicate: impl Fn(&ChunkOutcome) -> bool) -> usize {
    summary
        .chunks
        .values()
        .filter(|outcome| predicate(outcome))
        .count()
}

fn input_read_error(path: &Path, err: LakeError) -> LakeError {
    lake_error!(
        ErrorKind::InputReadError,
        "Raw input could not be read",
        format!("{}: {}", path.display(), err.reason()),
        source: err
    )
}
