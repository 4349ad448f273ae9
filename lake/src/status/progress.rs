use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;

use crate::error::LakeResult;
use crate::layout::organized;
use crate::table::base::TableStore;
use crate::types::ChunkId;

/// How many of the expected chunks a representation already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: u32,
    pub done: u32,
    pub missing: Vec<ChunkId>,
}

impl Progress {
    fn from_present(chunk_count: u32, present: impl Fn(ChunkId) -> bool) -> Self {
        let missing: Vec<_> = ChunkId::all(chunk_count)
            .filter(|chunk| !present(*chunk))
            .collect();

        Self {
            total: chunk_count,
            done: chunk_count - missing.len() as u32,
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Counts the organized chunks whose output is a readable, non-empty file.
///
/// Only parquet footers are read.
pub async fn organized_progress(organized_dir: &Path, chunk_count: u32) -> LakeResult<Progress> {
    let organized_dir = organized_dir.to_path_buf();
    let progress = tokio::task::spawn_blocking(move || {
        Progress::from_present(chunk_count, |chunk| {
            organized::inspect_chunk(&organized_dir, chunk).is_valid()
        })
    })
    .await?;

    Ok(progress)
}

/// Counts the chunks that have a partition in the table.
pub async fn table_progress<S: TableStore>(store: &S, chunk_count: u32) -> LakeResult<Progress> {
    let present: BTreeSet<ChunkId> = store
        .list_partitions()
        .await?
        .into_iter()
        .filter_map(|entry| entry.chunk)
        .collect();

    Ok(Progress::from_present(chunk_count, |chunk| {
        present.contains(&chunk)
    }))
}
