//! Table store backed by a directory of parquet partitions and a JSON commit log.
//!
//! ```text
//! <table_dir>/parcel_data/
//!     parcel_chunk=00/part-<uuid>.parquet
//!     _log/00000000000000000001.json
//!     _staging/
//! ```
//!
//! A commit writes the new files into a fresh staging directory and publishes them with
//! directory renames. The previous contents of a replaced partition are moved aside first and
//! deleted once the new directory is in place, so a partition directory always holds a complete
//! set of files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::error::{ErrorKind, LakeError, LakeResult};
use crate::failpoints::{TABLE_COMMIT_PARTITION, lake_fail_point};
use crate::lake_error;
use crate::table::base::{CommitMode, CommitResult, PartitionEntry, PartitionFile, TableStore};
use crate::types::{ChunkId, Observation};

pub const TABLE_NAME: &str = "parcel_data";
const LOG_DIR_NAME: &str = "_log";
const STAGING_DIR_NAME: &str = "_staging";
const DATA_FILE_PREFIX: &str = "part-";
const DATA_FILE_SUFFIX: &str = ".parquet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOperation {
    Write,
    Replace,
    Optimize,
}

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLogEntry {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: CommitOperation,
    pub partition: String,
    pub added_files: Vec<String>,
    pub removed_files: Vec<String>,
    pub row_count: u64,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    max_rows_per_file: usize,
    next_version: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct FileTableStore {
    inner: Arc<Inner>,
}

impl FileTableStore {
    /// Opens the table under `table_dir`, creating it when it does not exist.
    pub fn open(table_dir: &Path, max_rows_per_file: usize) -> LakeResult<Self> {
        let root = table_dir.join(TABLE_NAME);
        fs::create_dir_all(root.join(LOG_DIR_NAME))?;

        let stale_staging = root.join(STAGING_DIR_NAME);
        if stale_staging.exists() {
            fs::remove_dir_all(&stale_staging)?;
        }

        let latest = read_log(&root)?
            .last()
            .map(|entry| entry.version)
            .unwrap_or(0);

        debug!(root = %root.display(), latest_version = latest, "opened table");

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                max_rows_per_file: max_rows_per_file.max(1),
                next_version: AtomicU64::new(latest + 1),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Returns the commit log, oldest first.
    pub fn history(&self) -> LakeResult<Vec<CommitLogEntry>> {
        read_log(&self.inner.root)
    }

    pub fn partition_dir(&self, chunk: ChunkId) -> PathBuf {
        self.inner.root.join(chunk.dir_name())
    }

    async fn blocking<T, F>(&self, f: F) -> LakeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> LakeResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(inner.as_ref())).await?
    }
}

impl Inner {
    fn partition_dir(&self, chunk: ChunkId) -> PathBuf {
        self.root.join(chunk.dir_name())
    }

    fn data_files(&self, chunk: ChunkId) -> LakeResult<Vec<PathBuf>> {
        let dir = self.partition_dir(chunk);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_data_file = path.file_name().is_some_and(|name| {
                let name = name.to_string_lossy();
                name.starts_with(DATA_FILE_PREFIX) && name.ends_with(DATA_FILE_SUFFIX)
            });
            if is_data_file {
                files.push(path);
            }
        }
        files.sort();

        Ok(files)
    }

    fn list_partitions(&self) -> LakeResult<Vec<PartitionEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOG_DIR_NAME || name == STAGING_DIR_NAME || name.starts_with('.') {
                continue;
            }

            entries.push(PartitionEntry {
                chunk: ChunkId::from_dir_name(&name),
                name,
            });
        }

        entries.sort_by(|a, b| a.chunk.cmp(&b.chunk).then_with(|| a.name.cmp(&b.name)));

        Ok(entries)
    }

    fn partition_files(&self, chunk: ChunkId) -> LakeResult<Vec<PartitionFile>> {
        self.data_files(chunk)?
            .into_iter()
            .map(|path| {
                let rows = codec::row_count(&path)
                    .map_err(|err| partition_read_error(chunk, &path, err))?;
                Ok(PartitionFile { path, rows })
            })
            .collect()
    }

    fn read_partition(&self, chunk: ChunkId) -> LakeResult<Vec<Observation>> {
        if !self.partition_dir(chunk).is_dir() {
            return Err(lake_error!(
                ErrorKind::PartitionReadError,
                "Partition does not exist",
                format!("chunk {chunk}")
            ));
        }

        let mut records = Vec::new();
        for path in self.data_files(chunk)? {
            let file_records = codec::read_observations(&path, 65_536)
                .map_err(|err| partition_read_error(chunk, &path, err))?;
            records.extend(file_records);
        }

        Ok(records)
    }

    fn commit(
        &self,
        chunk: ChunkId,
        records: &[Observation],
        mode: CommitMode,
    ) -> LakeResult<CommitResult> {
        let existing = self.data_files(chunk)?;
        if !existing.is_empty() && mode == CommitMode::SkipExisting {
            let rows = self
                .partition_files(chunk)
                .map(|files| files.iter().map(|file| file.rows).sum())
                .unwrap_or_default();
            debug!(%chunk, "partition exists, skipping commit");
            return Ok(CommitResult::skipped(existing.len(), rows));
        }

        let operation = if self.partition_dir(chunk).exists() {
            CommitOperation::Replace
        } else {
            CommitOperation::Write
        };

        self.publish(chunk, records, self.max_rows_per_file, operation)
            .map_err(|err| commit_error(chunk, err))
    }

    fn optimize(&self, chunk: ChunkId) -> LakeResult<CommitResult> {
        let files = self.partition_files(chunk)?;
        let rows: u64 = files.iter().map(|file| file.rows).sum();
        if files.len() <= 1 {
            return Ok(CommitResult::skipped(files.len(), rows));
        }

        let records = self.read_partition(chunk)?;
        let max_rows = records.len().max(1);
        self.publish(chunk, &records, max_rows, CommitOperation::Optimize)
            .map_err(|err| commit_error(chunk, err))
    }

    /// Stages `records` as new files of `chunk` and swaps them in.
    fn publish(
        &self,
        chunk: ChunkId,
        records: &[Observation],
        max_rows_per_file: usize,
        operation: CommitOperation,
    ) -> LakeResult<CommitResult> {
        let staging_root = self.root.join(STAGING_DIR_NAME);
        let staged = staging_root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&staged)?;

        let added_files = match self.stage_files(&staged, records, max_rows_per_file) {
            Ok(files) => files,
            Err(err) => {
                remove_dir_quietly(&staged);
                return Err(err);
            }
        };

        if let Err(err) = lake_fail_point(TABLE_COMMIT_PARTITION, ErrorKind::CommitError) {
            remove_dir_quietly(&staged);
            return Err(err);
        }

        let target = self.partition_dir(chunk);
        let removed_files = file_names(&self.data_files(chunk)?);

        let retired = if target.exists() {
            let retired = staging_root.join(format!("{}-retired", Uuid::new_v4().simple()));
            fs::rename(&target, &retired)?;
            Some(retired)
        } else {
            None
        };

        if let Err(err) = fs::rename(&staged, &target) {
            // Put the previous contents back so the partition stays readable.
            if let Some(retired) = &retired
                && let Err(restore_err) = fs::rename(retired, &target)
            {
                warn!(%chunk, error = %restore_err, "failed to restore previous partition");
            }
            remove_dir_quietly(&staged);
            return Err(err.into());
        }

        if let Some(retired) = retired {
            remove_dir_quietly(&retired);
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let entry = CommitLogEntry {
            version,
            timestamp: Utc::now(),
            operation,
            partition: chunk.dir_name(),
            added_files: added_files.clone(),
            removed_files,
            row_count: records.len() as u64,
        };
        self.append_log(&entry)?;

        info!(
            %chunk,
            version,
            ?operation,
            files = added_files.len(),
            rows = records.len(),
            "committed partition"
        );

        Ok(CommitResult {
            success: true,
            skipped: false,
            file_count: added_files.len(),
            row_count: records.len() as u64,
            version: Some(version),
        })
    }

    fn stage_files(
        &self,
        staged: &Path,
        records: &[Observation],
        max_rows_per_file: usize,
    ) -> LakeResult<Vec<String>> {
        let mut names = Vec::new();

        // An empty partition still gets one file so that it exists in the table.
        let batches: Vec<&[Observation]> = if records.is_empty() {
            vec![records]
        } else {
            records.chunks(max_rows_per_file).collect()
        };

        for batch in batches {
            let name = format!(
                "{DATA_FILE_PREFIX}{}{DATA_FILE_SUFFIX}",
                Uuid::new_v4().simple()
            );
            let path = staged.join(&name);
            codec::write_observations(&path, batch)?;
            fs::File::open(&path)?.sync_all()?;
            names.push(name);
        }

        Ok(names)
    }

    fn append_log(&self, entry: &CommitLogEntry) -> LakeResult<()> {
        let path = self
            .root
            .join(LOG_DIR_NAME)
            .join(format!("{:020}.json", entry.version));
        let temp = codec::temp_sibling(&path)?;

        let json = serde_json::to_vec_pretty(entry).map_err(|err| {
            lake_error!(
                ErrorKind::SerializationError,
                "Commit log entry could not be serialized",
                source: err
            )
        })?;
        fs::write(&temp, json)?;
        fs::rename(&temp, &path)?;

        Ok(())
    }
}

impl TableStore for FileTableStore {
    fn name() -> &'static str {
        "file"
    }

    async fn list_partitions(&self) -> LakeResult<Vec<PartitionEntry>> {
        self.blocking(|inner| inner.list_partitions()).await
    }

    async fn commit_partition(
        &self,
        chunk: ChunkId,
        records: Vec<Observation>,
        mode: CommitMode,
    ) -> LakeResult<CommitResult> {
        self.blocking(move |inner| inner.commit(chunk, &records, mode))
            .await
    }

    async fn read_partition(&self, chunk: ChunkId) -> LakeResult<Vec<Observation>> {
        self.blocking(move |inner| inner.read_partition(chunk))
            .await
    }

    async fn partition_files(&self, chunk: ChunkId) -> LakeResult<Vec<PartitionFile>> {
        self.blocking(move |inner| inner.partition_files(chunk))
            .await
    }

    async fn optimize(&self, chunk: ChunkId) -> LakeResult<CommitResult> {
        self.blocking(move |inner| inner.optimize(chunk)).await
    }
}

fn read_log(root: &Path) -> LakeResult<Vec<CommitLogEntry>> {
    let log_dir = root.join(LOG_DIR_NAME);
    if !log_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&log_dir)? {
        let path = entry?.path();
        let is_entry = path.extension().is_some_and(|ext| ext == "json")
            && !path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if is_entry {
            let entry: CommitLogEntry = serde_json::from_slice(&fs::read(&path)?)?;
            entries.push(entry);
        }
    }
    entries.sort_by_key(|entry| entry.version);

    Ok(entries)
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn remove_dir_quietly(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove directory");
    }
}

fn partition_read_error(chunk: ChunkId, path: &Path, err: LakeError) -> LakeError {
    let detail = format!(
        "chunk {chunk}, file {}: {}",
        path.display(),
        err.detail().unwrap_or(err.description())
    );
    lake_error!(
        ErrorKind::PartitionReadError,
        "Partition file could not be read",
        detail = detail,
        source: err
    )
}

fn commit_error(chunk: ChunkId, err: LakeError) -> LakeError {
    if err.kind() == ErrorKind::CommitError {
        return err;
    }

    let detail = format!(
        "chunk {chunk}: {}",
        err.detail().unwrap_or(err.description())
    );
    lake_error!(
        ErrorKind::CommitError,
        "Partition commit failed",
        detail = detail,
        source: err
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, observation};

    fn records(count: usize) -> Vec<Observation> {
        (0..count)
            .map(|i| observation(&format!("parcel_{i:03}"), date(2024, 1, 1), i as f64))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partitions_are_split_by_max_rows_and_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTableStore::open(dir.path(), 4).unwrap();

        let result = store
            .commit_partition(ChunkId(0), records(10), CommitMode::Replace)
            .await
            .unwrap();
        assert_eq!(result.file_count, 3);
        assert_eq!(result.row_count, 10);
        assert_eq!(result.version, Some(1));

        let optimized = store.optimize(ChunkId(0)).await.unwrap();
        assert_eq!(optimized.file_count, 1);
        assert_eq!(store.read_partition(ChunkId(0)).await.unwrap(), records(10));

        let history = store.history().unwrap();
        let operations: Vec<_> = history.iter().map(|entry| entry.operation).collect();
        assert_eq!(
            operations,
            vec![CommitOperation::Write, CommitOperation::Optimize]
        );
        assert_eq!(history[1].removed_files.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn skip_existing_leaves_partition_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTableStore::open(dir.path(), 100).unwrap();

        store
            .commit_partition(ChunkId(1), records(3), CommitMode::Replace)
            .await
            .unwrap();
        let skipped = store
            .commit_partition(ChunkId(1), records(5), CommitMode::SkipExisting)
            .await
            .unwrap();
        assert!(skipped.skipped);
        assert_eq!(skipped.row_count, 3);

        let replaced = store
            .commit_partition(ChunkId(1), records(5), CommitMode::Replace)
            .await
            .unwrap();
        assert!(!replaced.skipped);
        assert_eq!(store.read_partition(ChunkId(1)).await.unwrap().len(), 5);
        assert_eq!(store.partition_files(ChunkId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn versions_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileTableStore::open(dir.path(), 100).unwrap();
            store
                .commit_partition(ChunkId(0), records(1), CommitMode::Replace)
                .await
                .unwrap();
        }

        let store = FileTableStore::open(dir.path(), 100).unwrap();
        let result = store
            .commit_partition(ChunkId(1), Vec::new(), CommitMode::Replace)
            .await
            .unwrap();

        assert_eq!(result.version, Some(2));
        assert_eq!(result.file_count, 1);
        assert_eq!(result.row_count, 0);

        let partitions = store.list_partitions().await.unwrap();
        let chunks: Vec<_> = partitions.iter().map(|entry| entry.chunk).collect();
        assert_eq!(chunks, vec![Some(ChunkId(0)), Some(ChunkId(1))]);
    }
}
