use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lake_config::shared::CommitConfig;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span};

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, LakeResult};
use crate::hash::EntityHasher;
use crate::lake_error;
use crate::layout::organized;
use crate::reorg::dedup::deduplicate_rows;
use crate::table::base::{CommitMode, CommitResult, TableStore};
use crate::types::{ChunkId, Observation};
use crate::workers::pool::ChunkWorkerPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOptions {
    pub force: bool,
    /// Compacts partitions committed as several files.
    pub optimize: bool,
    pub batch_size: usize,
    pub workers: usize,
}

impl CommitOptions {
    pub fn from_config(config: &CommitConfig, batch_size: usize, workers: usize) -> Self {
        Self {
            force: config.force,
            optimize: config.optimize,
            batch_size,
            workers,
        }
    }

    fn mode(&self) -> CommitMode {
        if self.force {
            CommitMode::Replace
        } else {
            CommitMode::SkipExisting
        }
    }
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            force: false,
            optimize: false,
            batch_size: 8192,
            workers: 1,
        }
    }
}

/// Result for one partition of a commit run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PartitionOutcome {
    Committed {
        rows: u64,
        files: usize,
        version: Option<u64>,
    },
    /// The partition already existed and `force` was not set.
    Skipped,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub total_chunks: u32,
    pub committed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows_committed: u64,
    pub partitions: BTreeMap<ChunkId, PartitionOutcome>,
}

impl CommitSummary {
    /// Returns every chunk that could not be committed with the reason.
    pub fn failed_chunks(&self) -> BTreeMap<ChunkId, &str> {
        self.partitions
            .iter()
            .filter_map(|(chunk, outcome)| match outcome {
                PartitionOutcome::Failed { reason } => Some((*chunk, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Commits finalized chunk datasets as partitions of the table.
#[derive(Debug, Clone)]
pub struct TableCommitter<S> {
    store: S,
    options: CommitOptions,
    shutdown_rx: ShutdownRx,
}

impl<S> TableCommitter<S>
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    pub fn new(store: S, options: CommitOptions, shutdown_rx: ShutdownRx) -> Self {
        Self {
            store,
            options,
            shutdown_rx,
        }
    }

    /// Commits `records` as the partition of `chunk`.
    ///
    /// Duplicate `(parcel_id, date)` pairs are collapsed first, later rows winning. Without
    /// `force` an existing partition is left untouched.
    pub async fn commit_partition(
        &self,
        chunk: ChunkId,
        records: Vec<Observation>,
    ) -> LakeResult<CommitResult> {
        commit_chunk(&self.store, &self.options, chunk, records).await
    }

    /// Commits every chunk file of the organized layout under `organized_dir`.
    ///
    /// Chunks are committed in parallel and failures are isolated per chunk. A chunk without an
    /// organized file counts as failed.
    pub async fn commit_organized(
        &self,
        organized_dir: &Path,
        chunk_count: u32,
    ) -> LakeResult<CommitSummary> {
        let hasher = EntityHasher::new(chunk_count)?;
        let existing: BTreeSet<ChunkId> = if self.options.force {
            BTreeSet::new()
        } else {
            self.store
                .list_partitions()
                .await?
                .into_iter()
                .filter_map(|entry| entry.chunk)
                .collect()
        };

        info!(
            store = S::name(),
            chunk_count = hasher.chunk_count(),
            existing = existing.len(),
            force = self.options.force,
            "starting table commit"
        );

        let mut summary = CommitSummary {
            total_chunks: hasher.chunk_count(),
            committed: 0,
            skipped: 0,
            failed: 0,
            rows_committed: 0,
            partitions: BTreeMap::new(),
        };

        let mut pool: ChunkWorkerPool<CommitResult> = ChunkWorkerPool::new(self.options.workers);
        for chunk in ChunkId::all(hasher.chunk_count()) {
            if existing.contains(&chunk) {
                debug!(%chunk, "partition exists, skipping");
                summary.skipped += 1;
                summary.partitions.insert(chunk, PartitionOutcome::Skipped);
                continue;
            }

            let store = self.store.clone();
            let options = self.options.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            let path = organized::chunk_file(organized_dir, chunk);
            let span = info_span!("commit_chunk", %chunk);

            pool.spawn(
                chunk,
                async move {
                    shutdown_rx.check()?;
                    let records = read_chunk(chunk, path, options.batch_size).await?;
                    commit_chunk(&store, &options, chunk, records).await
                }
                .instrument(span),
            )?;
        }

        for (chunk, result) in pool.join_all().await {
            let outcome = match result {
                Ok(result) if result.skipped => {
                    summary.skipped += 1;
                    PartitionOutcome::Skipped
                }
                Ok(result) => {
                    summary.committed += 1;
                    summary.rows_committed += result.row_count;
                    PartitionOutcome::Committed {
                        rows: result.row_count,
                        files: result.file_count,
                        version: result.version,
                    }
                }
                Err(err) => {
                    error!(%chunk, error = %err, "failed to commit partition");
                    summary.failed += 1;
                    PartitionOutcome::Failed {
                        reason: err.reason(),
                    }
                }
            };
            summary.partitions.insert(chunk, outcome);
        }

        self.shutdown_rx.check()?;

        info!(
            committed = summary.committed,
            skipped = summary.skipped,
            failed = summary.failed,
            rows = summary.rows_committed,
            "table commit finished"
        );

        Ok(summary)
    }
}

async fn read_chunk(
    chunk: ChunkId,
    path: PathBuf,
    batch_size: usize,
) -> LakeResult<Vec<Observation>> {
    if !path.is_file() {
        return Err(lake_error!(
            ErrorKind::CommitError,
            "Organized chunk is missing",
            format!("chunk {chunk}: {}", path.display())
        ));
    }

    tokio::task::spawn_blocking(move || codec::read_observations(&path, batch_size))
        .await?
        .map_err(|err| {
            lake_error!(
                ErrorKind::CommitError,
                "Organized chunk could not be read",
                format!("chunk {chunk}: {}", err.reason()),
                source: err
            )
        })
}

async fn commit_chunk<S: TableStore>(
    store: &S,
    options: &CommitOptions,
    chunk: ChunkId,
    records: Vec<Observation>,
) -> LakeResult<CommitResult> {
    let deduplicated = deduplicate_rows(records);
    if deduplicated.duplicates_removed > 0 {
        debug!(
            %chunk,
            duplicates = deduplicated.duplicates_removed,
            "dropped duplicate records before commit"
        );
    }

    let result = store
        .commit_partition(chunk, deduplicated.records, options.mode())
        .await?;

    if options.optimize && !result.skipped && result.file_count > 1 {
        return store.optimize(chunk).await;
    }

    Ok(result)
}
