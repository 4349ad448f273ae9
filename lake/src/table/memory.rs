use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, LakeResult};
use crate::lake_error;
use crate::table::base::{CommitMode, CommitResult, PartitionEntry, PartitionFile, TableStore};
use crate::types::{ChunkId, Observation};

#[derive(Debug, Default)]
struct Inner {
    /// Data files of each partition.
    partitions: BTreeMap<ChunkId, Vec<Vec<Observation>>>,
    corrupt: BTreeMap<ChunkId, String>,
    unexpected: Vec<String>,
    version: u64,
    max_rows_per_file: Option<usize>,
}

/// In-memory table store.
///
/// Holds partitions as lists of in-memory files and can simulate damaged partitions, which makes
/// it suitable for exercising the committer and the table checks without touching disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that splits commits into files of at most `max_rows_per_file` rows.
    pub fn with_max_rows_per_file(max_rows_per_file: usize) -> Self {
        let inner = Inner {
            max_rows_per_file: Some(max_rows_per_file.max(1)),
            ..Inner::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Makes reads of the partition of `chunk` fail with `reason`.
    pub async fn mark_corrupt(&self, chunk: ChunkId, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.partitions.entry(chunk).or_default();
        inner.corrupt.insert(chunk, reason.into());
    }

    /// Adds a partition-level entry that does not belong to any chunk.
    pub async fn add_unexpected_partition(&self, name: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.unexpected.push(name.into());
    }

    /// Removes the partition of `chunk`.
    pub async fn drop_partition(&self, chunk: ChunkId) {
        let mut inner = self.inner.lock().await;
        inner.partitions.remove(&chunk);
        inner.corrupt.remove(&chunk);
    }

    pub async fn version(&self) -> u64 {
        self.inner.lock().await.version
    }
}

impl Inner {
    fn ensure_readable(&self, chunk: ChunkId) -> LakeResult<&Vec<Vec<Observation>>> {
        if let Some(reason) = self.corrupt.get(&chunk) {
            return Err(lake_error!(
                ErrorKind::PartitionReadError,
                "Partition file could not be read",
                format!("chunk {chunk}: {reason}")
            ));
        }

        self.partitions.get(&chunk).ok_or_else(|| {
            lake_error!(
                ErrorKind::PartitionReadError,
                "Partition does not exist",
                format!("chunk {chunk}")
            )
        })
    }
}

impl TableStore for MemoryTableStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn list_partitions(&self) -> LakeResult<Vec<PartitionEntry>> {
        let inner = self.inner.lock().await;

        let mut entries: Vec<PartitionEntry> = inner
            .unexpected
            .iter()
            .map(|name| PartitionEntry {
                name: name.clone(),
                chunk: None,
            })
            .collect();
        entries.extend(inner.partitions.keys().map(|chunk| PartitionEntry {
            name: chunk.dir_name(),
            chunk: Some(*chunk),
        }));
        entries.sort_by(|a, b| a.chunk.cmp(&b.chunk).then_with(|| a.name.cmp(&b.name)));

        Ok(entries)
    }

    async fn commit_partition(
        &self,
        chunk: ChunkId,
        records: Vec<Observation>,
        mode: CommitMode,
    ) -> LakeResult<CommitResult> {
        let mut inner = self.inner.lock().await;

        if mode == CommitMode::SkipExisting
            && let Some(files) = inner.partitions.get(&chunk)
        {
            let rows = files.iter().map(|file| file.len() as u64).sum();
            return Ok(CommitResult::skipped(files.len(), rows));
        }

        let row_count = records.len() as u64;
        let files = match inner.max_rows_per_file {
            Some(max_rows) if records.len() > max_rows => records
                .chunks(max_rows)
                .map(<[Observation]>::to_vec)
                .collect(),
            _ => vec![records],
        };
        let file_count = files.len();

        inner.partitions.insert(chunk, files);
        inner.corrupt.remove(&chunk);
        inner.version += 1;

        Ok(CommitResult {
            success: true,
            skipped: false,
            file_count,
            row_count,
            version: Some(inner.version),
        })
    }

    async fn read_partition(&self, chunk: ChunkId) -> LakeResult<Vec<Observation>> {
        let inner = self.inner.lock().await;
        let files = inner.ensure_readable(chunk)?;

        Ok(files.concat())
    }

    async fn partition_files(&self, chunk: ChunkId) -> LakeResult<Vec<PartitionFile>> {
        let inner = self.inner.lock().await;
        let Some(files) = inner.partitions.get(&chunk) else {
            return Ok(Vec::new());
        };
        inner.ensure_readable(chunk)?;

        Ok(files
            .iter()
            .enumerate()
            .map(|(i, file)| PartitionFile {
                path: PathBuf::from(format!("memory://{}/part-{i:05}", chunk.dir_name())),
                rows: file.len() as u64,
            })
            .collect())
    }

    async fn optimize(&self, chunk: ChunkId) -> LakeResult<CommitResult> {
        let mut inner = self.inner.lock().await;
        let files = inner.ensure_readable(chunk)?;
        let row_count = files.iter().map(|file| file.len() as u64).sum();
        if files.len() <= 1 {
            return Ok(CommitResult::skipped(files.len(), row_count));
        }

        let merged = files.concat();
        inner.partitions.insert(chunk, vec![merged]);
        inner.version += 1;

        Ok(CommitResult {
            success: true,
            skipped: false,
            file_count: 1,
            row_count,
            version: Some(inner.version),
        })
    }
}
