use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings for the streaming reorganization phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReorgConfig {
    /// Fixed number of chunks. Takes precedence over `chunk_size`.
    #[serde(default)]
    pub chunk_count: Option<u32>,
    /// Target number of entities per chunk, used to derive the chunk count from the population.
    #[serde(default)]
    pub chunk_size: Option<u32>,
    /// Maximum rows decoded per read batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Rows buffered in memory across all chunks before the largest buffers spill to disk.
    #[serde(default = "default_max_buffered_rows")]
    pub max_buffered_rows: usize,
    /// Attempts made to write one chunk before it is marked failed.
    #[serde(default = "default_max_flush_attempts")]
    pub max_flush_attempts: u32,
    /// Overwrite chunk outputs that already exist.
    #[serde(default)]
    pub force: bool,
    /// Abort on the first unreadable raw input instead of skipping it.
    #[serde(default)]
    pub fail_fast: bool,
    /// Plan the run without reading or writing data.
    #[serde(default)]
    pub dry_run: bool,
    /// Largest chunk to mean chunk entity ratio tolerated before a skew warning is logged.
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold: f64,
}

impl ReorgConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 8192;

    pub const DEFAULT_MAX_BUFFERED_ROWS: usize = 500_000;

    pub const DEFAULT_MAX_FLUSH_ATTEMPTS: u32 = 3;

    pub const DEFAULT_SKEW_THRESHOLD: f64 = 1.5;

    /// Validates reorganization settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.chunk_count, self.chunk_size) {
            (None, None) => return Err(ValidationError::MissingChunking),
            (Some(0), _) => {
                return Err(ValidationError::invalid(
                    "reorg.chunk_count",
                    "must be greater than 0",
                ));
            }
            (None, Some(0)) => {
                return Err(ValidationError::invalid(
                    "reorg.chunk_size",
                    "must be greater than 0",
                ));
            }
            _ => {}
        }

        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "reorg.batch_size",
                "must be greater than 0",
            ));
        }

        if self.max_buffered_rows == 0 {
            return Err(ValidationError::invalid(
                "reorg.max_buffered_rows",
                "must be greater than 0",
            ));
        }

        if self.max_flush_attempts == 0 {
            return Err(ValidationError::invalid(
                "reorg.max_flush_attempts",
                "must be greater than 0",
            ));
        }

        if self.skew_threshold.is_nan() || self.skew_threshold < 1.0 {
            return Err(ValidationError::invalid(
                "reorg.skew_threshold",
                "must be at least 1.0",
            ));
        }

        Ok(())
    }
}

impl Default for ReorgConfig {
    fn default() -> Self {
        Self {
            chunk_count: None,
            chunk_size: None,
            batch_size: default_batch_size(),
            max_buffered_rows: default_max_buffered_rows(),
            max_flush_attempts: default_max_flush_attempts(),
            force: false,
            fail_fast: false,
            dry_run: false,
            skew_threshold: default_skew_threshold(),
        }
    }
}

fn default_batch_size() -> usize {
    ReorgConfig::DEFAULT_BATCH_SIZE
}

fn default_max_buffered_rows() -> usize {
    ReorgConfig::DEFAULT_MAX_BUFFERED_ROWS
}

fn default_max_flush_attempts() -> u32 {
    ReorgConfig::DEFAULT_MAX_FLUSH_ATTEMPTS
}

fn default_skew_threshold() -> f64 {
    ReorgConfig::DEFAULT_SKEW_THRESHOLD
}
