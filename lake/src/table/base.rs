use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::LakeResult;
use crate::types::{ChunkId, Observation};

/// How a commit treats a partition that already has data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Replaces the partition wholesale.
    Replace,
    /// Leaves an existing partition untouched.
    SkipExisting,
}

/// Outcome of committing one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub success: bool,
    /// The partition already existed and was left untouched.
    pub skipped: bool,
    pub file_count: usize,
    pub row_count: u64,
    /// Table version created by the commit, if any.
    pub version: Option<u64>,
}

impl CommitResult {
    pub fn skipped(file_count: usize, row_count: u64) -> Self {
        Self {
            success: true,
            skipped: true,
            file_count,
            row_count,
            version: None,
        }
    }
}

/// A directory-level entry of the table.
///
/// `chunk` is `None` when the entry name is not a partition name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub chunk: Option<ChunkId>,
}

/// A data file of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub path: PathBuf,
    pub rows: u64,
}

/// Narrow interface to the transactional table holding one partition per chunk.
///
/// Commits must be atomic per partition: a reader observes either the previous contents of a
/// partition or the new ones, never a mix, and a failed commit leaves the previous contents in
/// place.
pub trait TableStore {
    /// Returns the name of the store implementation.
    fn name() -> &'static str;

    /// Lists every partition-level entry of the table, sorted by chunk.
    fn list_partitions(&self) -> impl Future<Output = LakeResult<Vec<PartitionEntry>>> + Send;

    /// Writes `records` as the contents of the partition of `chunk`.
    fn commit_partition(
        &self,
        chunk: ChunkId,
        records: Vec<Observation>,
        mode: CommitMode,
    ) -> impl Future<Output = LakeResult<CommitResult>> + Send;

    /// Reads every record of the partition of `chunk`.
    ///
    /// Fails with [`crate::error::ErrorKind::PartitionReadError`] when the partition is missing
    /// or cannot be decoded.
    fn read_partition(
        &self,
        chunk: ChunkId,
    ) -> impl Future<Output = LakeResult<Vec<Observation>>> + Send;

    /// Lists the data files of the partition of `chunk`.
    fn partition_files(
        &self,
        chunk: ChunkId,
    ) -> impl Future<Output = LakeResult<Vec<PartitionFile>>> + Send;

    /// Compacts the partition of `chunk` into a single data file.
    fn optimize(&self, chunk: ChunkId) -> impl Future<Output = LakeResult<CommitResult>> + Send;
}
