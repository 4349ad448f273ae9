//! Core record and key types shared across the engine.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Number of measurement columns carried by every observation.
pub const MEASUREMENT_COUNT: usize = 12;

/// Names of the measurement columns, in storage order.
pub const MEASUREMENT_COLUMNS: [&str; MEASUREMENT_COUNT] = [
    "ndvi",
    "evi",
    "red",
    "nir",
    "blue",
    "green",
    "swir1",
    "swir2",
    "temperature",
    "precipitation",
    "cloud_cover",
    "geometry_area",
];

/// Numeric measurements recorded for one parcel on one date.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurements {
    pub ndvi: f64,
    pub evi: f64,
    pub red: f64,
    pub nir: f64,
    pub blue: f64,
    pub green: f64,
    pub swir1: f64,
    pub swir2: f64,
    pub temperature: f64,
    pub precipitation: f64,
    pub cloud_cover: f64,
    pub geometry_area: f64,
}

impl Measurements {
    /// Returns the values in [`MEASUREMENT_COLUMNS`] order.
    pub fn to_array(&self) -> [f64; MEASUREMENT_COUNT] {
        [
            self.ndvi,
            self.evi,
            self.red,
            self.nir,
            self.blue,
            self.green,
            self.swir1,
            self.swir2,
            self.temperature,
            self.precipitation,
            self.cloud_cover,
            self.geometry_area,
        ]
    }

    /// Builds measurements from values in [`MEASUREMENT_COLUMNS`] order.
    pub fn from_array(values: [f64; MEASUREMENT_COUNT]) -> Self {
        let [
            ndvi,
            evi,
            red,
            nir,
            blue,
            green,
            swir1,
            swir2,
            temperature,
            precipitation,
            cloud_cover,
            geometry_area,
        ] = values;

        Self {
            ndvi,
            evi,
            red,
            nir,
            blue,
            green,
            swir1,
            swir2,
            temperature,
            precipitation,
            cloud_cover,
            geometry_area,
        }
    }
}

/// A single observation of one parcel on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub parcel_id: String,
    pub date: NaiveDate,
    pub measurements: Measurements,
}

impl Observation {
    pub fn new(parcel_id: impl Into<String>, date: NaiveDate, measurements: Measurements) -> Self {
        Self {
            parcel_id: parcel_id.into(),
            date,
            measurements,
        }
    }

    /// Returns the `(parcel_id, date)` key that must be unique within a chunk.
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.parcel_id, self.date)
    }
}

/// Index of a hash bucket of entities in `[0, chunk_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u32);

impl ChunkId {
    /// Prefix of the directory holding a chunk's data in both output layouts.
    pub const DIR_PREFIX: &'static str = "parcel_chunk=";

    /// Returns the directory name for this chunk, for example `parcel_chunk=03`.
    pub fn dir_name(&self) -> String {
        format!("{}{:02}", Self::DIR_PREFIX, self.0)
    }

    /// Parses a chunk directory name produced by [`ChunkId::dir_name`].
    pub fn from_dir_name(name: &str) -> Option<ChunkId> {
        let digits = name.strip_prefix(Self::DIR_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        digits.parse().ok().map(ChunkId)
    }

    /// Iterates all chunk ids for `chunk_count` chunks.
    pub fn all(chunk_count: u32) -> impl Iterator<Item = ChunkId> {
        (0..chunk_count).map(ChunkId)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a raw input file: the tile it covers and the acquisition date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePartition {
    pub tile: String,
    pub year: i32,
    pub date: NaiveDate,
}

impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "utm_tile={}/year={}/date={}",
            self.tile,
            self.year,
            self.date.format("%Y-%m-%d")
        )
    }
}
