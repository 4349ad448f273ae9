//! The chunk-partitioned table and the committer that fills it.

pub mod base;
pub mod committer;
pub mod file;
pub mod memory;

pub use base::{CommitMode, CommitResult, PartitionEntry, PartitionFile, TableStore};
pub use committer::{CommitOptions, CommitSummary, PartitionOutcome, TableCommitter};
pub use file::FileTableStore;
pub use memory::MemoryTableStore;
