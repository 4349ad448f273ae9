//! Reorganization of the raw layout into entity chunks.

pub mod dedup;
pub mod merger;
pub mod spill;

pub use dedup::{DedupOutput, Deduplicator, ScanPosition, ScannedRecord};
pub use merger::{ChunkOutcome, MergeOptions, ReorgPlan, ReorgSummary, StreamingChunkMerger};
