use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    CommitConfig, PathsConfig, ReorgConfig, StatusConfig, ValidationConfig, ValidationError,
};

/// Complete configuration for a reorganization run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LakeConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub reorg: ReorgConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub run: RunConfig,
    /// Upper bound on concurrently processed units. Defaults to the number of available cores.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// Which phases a run executes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// Only run the validation phase.
    #[serde(default)]
    pub validate_only: bool,
    /// Re-run phases the status store already records as completed.
    #[serde(default)]
    pub force: bool,
}

impl LakeConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.reorg.validate()?;
        self.commit.validate()?;
        self.validation.validate()?;

        if self.max_workers == Some(0) {
            return Err(ValidationError::invalid(
                "max_workers",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Number of workers to use for parallel phases.
    pub fn workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

impl Config for LakeConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["validation.targets"];
}
