//! Paths and state of the organized `parcel_chunk=NN/data.parquet` layout.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::LakeResult;
use crate::types::ChunkId;

/// Name of the single data file of an organized chunk.
pub const CHUNK_FILE_NAME: &str = "data.parquet";

/// Working directory for spill runs, removed after a successful run.
pub const STAGING_DIR_NAME: &str = "_staging";

pub fn chunk_dir(root: &Path, chunk: ChunkId) -> PathBuf {
    root.join(chunk.dir_name())
}

pub fn chunk_file(root: &Path, chunk: ChunkId) -> PathBuf {
    chunk_dir(root, chunk).join(CHUNK_FILE_NAME)
}

pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(STAGING_DIR_NAME)
}

/// State of a previously produced chunk output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingOutput {
    Missing,
    /// Readable and non-empty; eligible for skip-existing.
    Valid { rows: u64 },
    Empty,
    Corrupt { reason: String },
}

impl ExistingOutput {
    pub fn is_valid(&self) -> bool {
        matches!(self, ExistingOutput::Valid { .. })
    }
}

/// Inspects the output of `chunk` using only the parquet footer.
pub fn inspect_chunk(root: &Path, chunk: ChunkId) -> ExistingOutput {
    let path = chunk_file(root, chunk);
    if !path.is_file() {
        return ExistingOutput::Missing;
    }

    match codec::row_count(&path) {
        Ok(0) => ExistingOutput::Empty,
        Ok(rows) => ExistingOutput::Valid { rows },
        Err(err) => ExistingOutput::Corrupt {
            reason: err.detail().unwrap_or(err.description()).to_string(),
        },
    }
}

/// A directory found directly under the organized root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDirEntry {
    pub name: String,
    pub chunk: Option<ChunkId>,
}

/// Lists the chunk directories of `root`, skipping the staging area and hidden entries.
///
/// Directories whose name is not a chunk directory are returned with `chunk: None`.
pub fn list_chunk_dirs(root: &Path) -> LakeResult<Vec<ChunkDirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name == STAGING_DIR_NAME || name.starts_with('.') {
            continue;
        }

        entries.push(ChunkDirEntry {
            chunk: ChunkId::from_dir_name(&name),
            name,
        });
    }

    entries.sort_by(|a, b| a.chunk.cmp(&b.chunk).then_with(|| a.name.cmp(&b.name)));

    Ok(entries)
}
