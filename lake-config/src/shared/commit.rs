use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings for committing organized chunks into the table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommitConfig {
    /// Replace partitions that already exist instead of skipping them.
    #[serde(default)]
    pub force: bool,
    /// Maximum rows written into a single data file of a partition.
    #[serde(default = "default_max_rows_per_file")]
    pub max_rows_per_file: usize,
    /// Compact multi-file partitions after they are committed.
    #[serde(default)]
    pub optimize: bool,
}

impl CommitConfig {
    pub const DEFAULT_MAX_ROWS_PER_FILE: usize = 1_000_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_rows_per_file == 0 {
            return Err(ValidationError::invalid(
                "commit.max_rows_per_file",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            force: false,
            max_rows_per_file: default_max_rows_per_file(),
            optimize: false,
        }
    }
}

fn default_max_rows_per_file() -> usize {
    CommitConfig::DEFAULT_MAX_ROWS_PER_FILE
}
