use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where phase and chunk progress is persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusConfig {
    /// JSON status document. When unset, status is kept in memory for the run only.
    #[serde(default)]
    pub path: Option<PathBuf>,
}
