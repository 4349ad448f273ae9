use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Locations of the three on-disk representations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Root of the raw `utm_tile=/year=/date=` layout.
    pub raw_dir: PathBuf,
    /// Root of the organized `parcel_chunk=NN` layout.
    pub organized_dir: PathBuf,
    /// Root of the chunk-partitioned table.
    pub table_dir: PathBuf,
}
