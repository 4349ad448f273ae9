//! Shared configuration types for the reorganization engine and its binaries.

mod base;
mod commit;
mod lake;
mod paths;
mod reorg;
mod status;
mod validation;

pub use base::ValidationError;
pub use commit::CommitConfig;
pub use lake::{LakeConfig, RunConfig};
pub use paths::PathsConfig;
pub use reorg::ReorgConfig;
pub use status::StatusConfig;
pub use validation::{ExpectedDatesConfig, ValidationConfig, ValidationTarget};
