use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Days, NaiveDate};

use crate::codec;
use crate::layout::organized;
use crate::types::{ChunkId, Measurements, Observation};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// Returns `count` dates spaced one week apart starting at `start`.
pub fn weekly_dates(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count)
        .map(|i| start + Days::new(7 * i as u64))
        .collect()
}

/// Returns `count` entity ids of the form `{prefix}_{i:06}`.
pub fn entity_ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}_{i:06}")).collect()
}

/// Builds measurements whose values are all derived from `seed`.
pub fn measurements(seed: f64) -> Measurements {
    let mut values = [0.0; 12];
    for (i, value) in values.iter_mut().enumerate() {
        *value = seed + i as f64 / 100.0;
    }
    Measurements::from_array(values)
}

pub fn observation(parcel_id: &str, date: NaiveDate, seed: f64) -> Observation {
    Observation::new(parcel_id, date, measurements(seed))
}

/// Writes raw partitions under a root directory.
#[derive(Debug, Clone)]
pub struct RawFixture {
    root: PathBuf,
}

impl RawFixture {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, tile: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("utm_tile={tile}"))
            .join(format!("year={}", date.year()))
            .join(format!("date={}", date.format("%Y-%m-%d")))
    }

    pub fn partition_file(&self, tile: &str, date: NaiveDate) -> PathBuf {
        self.partition_dir(tile, date)
            .join(format!("{tile}_{}.parquet", date.format("%Y-%m-%d")))
    }

    /// Writes `records` as the data file of the `(tile, date)` partition.
    pub fn write_partition(&self, tile: &str, date: NaiveDate, records: &[Observation]) -> PathBuf {
        let path = self.partition_file(tile, date);
        fs::create_dir_all(self.partition_dir(tile, date)).expect("create partition dir");
        codec::write_observations(&path, records).expect("write raw partition");
        path
    }

    /// Writes one partition per date, each holding one record per entity.
    ///
    /// Measurement values are unique per `(entity, date)` so tests can tell records apart.
    pub fn write_grid<S: AsRef<str>>(
        &self,
        tile: &str,
        entities: &[S],
        dates: &[NaiveDate],
    ) -> Vec<PathBuf> {
        dates
            .iter()
            .enumerate()
            .map(|(d, date)| {
                let records: Vec<_> = entities
                    .iter()
                    .enumerate()
                    .map(|(e, entity)| observation(entity.as_ref(), *date, (e * 1000 + d) as f64))
                    .collect();
                self.write_partition(tile, *date, &records)
            })
            .collect()
    }

    /// Writes a file that is not valid parquet into the `(tile, date)` partition.
    pub fn write_corrupt(&self, tile: &str, date: NaiveDate) -> PathBuf {
        let path = self.partition_file(tile, date);
        fs::create_dir_all(self.partition_dir(tile, date)).expect("create partition dir");
        fs::write(&path, b"this is not a parquet file").expect("write corrupt file");
        path
    }
}

/// Writes `records` directly as the organized output of `chunk`, bypassing the merger.
pub fn write_chunk_file(root: &Path, chunk: ChunkId, records: &[Observation]) -> PathBuf {
    let path = organized::chunk_file(root, chunk);
    fs::create_dir_all(organized::chunk_dir(root, chunk)).expect("create chunk dir");
    codec::write_observations(&path, records).expect("write chunk file");
    path
}
