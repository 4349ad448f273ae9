//! Phase and chunk status tracking, plus read-only progress queries.

pub mod base;
pub mod json;
pub mod memory;
pub mod progress;

pub use base::{ChunkStatus, Phase, PhaseStatus, StatusDocument, StatusStore};
pub use json::JsonFileStatusStore;
pub use memory::MemoryStatusStore;
pub use progress::{Progress, organized_progress, table_progress};
