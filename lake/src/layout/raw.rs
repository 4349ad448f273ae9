//! Discovery of the raw `utm_tile=/year=/date=` layout.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::bail;
use crate::error::{ErrorKind, LakeResult};
use crate::types::SourcePartition;

const TILE_KEY: &str = "utm_tile";
const YEAR_KEY: &str = "year";
const DATE_KEY: &str = "date";
const DATE_FORMAT: &str = "%Y-%m-%d";
const PARQUET_EXTENSION: &str = "parquet";

/// A raw data file and the source partition it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    /// Position in the sorted scan order.
    pub index: u32,
    pub path: PathBuf,
    pub partition: SourcePartition,
}

/// A parquet file found under the raw root whose location does not describe a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedPath {
    pub path: PathBuf,
    pub reason: String,
}

/// The discovered raw inputs, sorted by tile, date and file name.
#[derive(Debug, Clone)]
pub struct RawLayout {
    inputs: Vec<RawInput>,
    rejected: Vec<RejectedPath>,
}

impl RawLayout {
    /// Walks `root` and collects every parquet file placed in a valid partition directory.
    pub fn discover(root: &Path) -> LakeResult<RawLayout> {
        if !root.is_dir() {
            bail!(
                ErrorKind::InputReadError,
                "Raw directory does not exist",
                root.display()
            );
        }

        let mut found = Vec::new();
        let mut rejected = Vec::new();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_data_file(entry.path()) {
                continue;
            }

            let path = entry.into_path();
            match parse_partition(root, &path) {
                Ok(partition) => found.push((partition, path)),
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "ignoring raw file outside a partition");
                    rejected.push(RejectedPath { path, reason });
                }
            }
        }

        found.sort();
        rejected.sort_by(|a, b| a.path.cmp(&b.path));

        let mut inputs = Vec::with_capacity(found.len());
        for (index, (partition, path)) in found.into_iter().enumerate() {
            let Ok(index) = u32::try_from(index) else {
                bail!(
                    ErrorKind::InputReadError,
                    "Too many raw inputs",
                    format!("more than {} files under {}", u32::MAX, root.display())
                );
            };
            inputs.push(RawInput {
                index,
                path,
                partition,
            });
        }

        debug!(
            root = %root.display(),
            inputs = inputs.len(),
            rejected = rejected.len(),
            "discovered raw layout"
        );

        Ok(RawLayout {
            inputs,
            rejected,
        })
    }

    pub fn inputs(&self) -> &[RawInput] {
        &self.inputs
    }

    pub fn rejected(&self) -> &[RejectedPath] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Distinct acquisition dates present in the layout.
    pub fn available_dates(&self) -> BTreeSet<NaiveDate> {
        self.inputs
            .iter()
            .map(|input| input.partition.date)
            .collect()
    }

    /// Inputs grouped by tile, in scan order.
    pub fn by_tile(&self) -> BTreeMap<&str, Vec<&RawInput>> {
        let mut tiles: BTreeMap<&str, Vec<&RawInput>> = BTreeMap::new();
        for input in &self.inputs {
            tiles
                .entry(input.partition.tile.as_str())
                .or_default()
                .push(input);
        }
        tiles
    }
}

fn is_data_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'));

    !hidden && path.extension().is_some_and(|ext| ext == PARQUET_EXTENSION)
}

/// Parses `root/utm_tile=T/year=Y/date=D/file.parquet` into its partition key.
fn parse_partition(root: &Path, path: &Path) -> Result<SourcePartition, String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| "path is outside of the raw root".to_string())?;

    let segments: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let [tile, year, date, _file] = segments.as_slice() else {
        return Err(format!(
            "expected {TILE_KEY}=/{YEAR_KEY}=/{DATE_KEY}=/<file>, found {} path segments",
            segments.len()
        ));
    };

    let tile = key_value(tile, TILE_KEY)?;
    if tile.is_empty() {
        return Err(format!("empty `{TILE_KEY}` value"));
    }

    let year: i32 = key_value(year, YEAR_KEY)?
        .parse()
        .map_err(|_| format!("invalid `{YEAR_KEY}` value in `{year}`"))?;

    let date = NaiveDate::parse_from_str(key_value(date, DATE_KEY)?, DATE_FORMAT)
        .map_err(|_| format!("invalid `{DATE_KEY}` value in `{date}`"))?;

    if date.year() != year {
        return Err(format!(
            "date {date} does not belong to year partition {year}"
        ));
    }

    Ok(SourcePartition {
        tile: tile.to_string(),
        year,
        date,
    })
}

fn key_value<'a>(segment: &'a str, key: &str) -> Result<&'a str, String> {
    segment
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| format!("expected `{key}=` segment, found `{segment}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::date;

    #[test]
    fn partition_paths_parse() {
        let root = Path::new("/raw");
        let partition = parse_partition(
            root,
            Path::new("/raw/utm_tile=32TNS/year=2024/date=2024-01-08/32TNS_2024-01-08.parquet"),
        )
        .unwrap();

        assert_eq!(partition.tile, "32TNS");
        assert_eq!(partition.year, 2024);
        assert_eq!(partition.date, date(2024, 1, 8));
    }

    #[test]
    fn malformed_partition_paths_are_rejected() {
        let root = Path::new("/raw");
        for path in [
            "/raw/utm_tile=32TNS/date=2024-01-08/data.parquet",
            "/raw/utm_tile=32TNS/year=2024/date=2024-13-08/data.parquet",
            "/raw/utm_tile=32TNS/year=2023/date=2024-01-08/data.parquet",
            "/raw/tile=32TNS/year=2024/date=2024-01-08/data.parquet",
            "/raw/utm_tile=/year=2024/date=2024-01-08/data.parquet",
        ] {
            assert!(
                parse_partition(root, Path::new(path)).is_err(),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn missing_root_is_an_input_error() {
        let err = RawLayout::discover(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputReadError);
    }
}
