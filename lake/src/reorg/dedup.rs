//! Collapsing of duplicate `(parcel_id, date)` records within a chunk.
//!
//! Precedence is last-observed-wins: every record carries its [`ScanPosition`], the index of
//! its raw input in sorted scan order and its row within that input, and the record with the
//! greatest position survives. The outcome depends only on the inputs, never on the order in
//! which workers happened to read them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::NaiveDate;

use crate::types::Observation;

/// Position of a record in the global scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanPosition {
    pub input: u32,
    pub row: u32,
}

/// A record tagged with where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRecord {
    pub position: ScanPosition,
    pub observation: Observation,
}

/// Deduplicated records of one chunk, sorted by `(parcel_id, date)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutput {
    pub records: Vec<Observation>,
    pub duplicates_removed: u64,
}

impl DedupOutput {
    /// Number of distinct entities in the output.
    pub fn entity_count(&self) -> u64 {
        let mut count = 0;
        let mut previous: Option<&str> = None;
        for record in &self.records {
            if previous != Some(record.parcel_id.as_str()) {
                count += 1;
                previous = Some(record.parcel_id.as_str());
            }
        }
        count
    }
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    survivors: HashMap<(String, NaiveDate), ScannedRecord>,
    seen: u64,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ScannedRecord) {
        self.seen += 1;

        let key = (record.observation.parcel_id.clone(), record.observation.date);
        match self.survivors.entry(key) {
            Entry::Occupied(mut entry) => {
                if record.position > entry.get().position {
                    entry.insert(record);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }

    pub fn extend<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = ScannedRecord>,
    {
        for record in records {
            self.push(record);
        }
    }

    pub fn finish(self) -> DedupOutput {
        let mut records: Vec<Observation> = self
            .survivors
            .into_values()
            .map(|record| record.observation)
            .collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));

        DedupOutput {
            duplicates_removed: self.seen - records.len() as u64,
            records,
        }
    }
}

/// Deduplicates records of a single source, where later rows take precedence.
pub fn deduplicate_rows(records: Vec<Observation>) -> DedupOutput {
    let mut deduplicator = Deduplicator::new();
    for (row, observation) in records.into_iter().enumerate() {
        deduplicator.push(ScannedRecord {
            position: ScanPosition {
                input: 0,
                row: u32::try_from(row).unwrap_or(u32::MAX),
            },
            observation,
        });
    }
    deduplicator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, observation};

    fn scanned(input: u32, row: u32, parcel_id: &str, seed: f64) -> ScannedRecord {
        ScannedRecord {
            position: ScanPosition { input, row },
            observation: observation(parcel_id, date(2024, 1, 1), seed),
        }
    }

    #[test]
    fn latest_scan_position_wins_regardless_of_push_order() {
        let records = vec![
            scanned(2, 0, "p1", 3.0),
            scanned(0, 5, "p1", 1.0),
            scanned(1, 0, "p1", 2.0),
            scanned(0, 0, "p2", 9.0),
        ];

        let mut forward = Deduplicator::new();
        forward.extend(records.clone());
        let mut backward = Deduplicator::new();
        backward.extend(records.into_iter().rev());

        let forward = forward.finish();
        let backward = backward.finish();

        assert_eq!(forward, backward);
        assert_eq!(forward.duplicates_removed, 2);
        assert_eq!(forward.records.len(), 2);
        assert_eq!(forward.records[0].parcel_id, "p1");
        assert_eq!(forward.records[0].measurements.ndvi, 3.0);
        assert_eq!(forward.entity_count(), 2);
    }

    #[test]
    fn later_rows_of_the_same_input_win() {
        let output = deduplicate_rows(vec![
            observation("p1", date(2024, 1, 1), 1.0),
            observation("p1", date(2024, 1, 8), 2.0),
            observation("p1", date(2024, 1, 1), 5.0),
        ]);

        assert_eq!(output.duplicates_removed, 1);
        assert_eq!(output.records[0].date, date(2024, 1, 1));
        assert_eq!(output.records[0].measurements.ndvi, 5.0);
        assert_eq!(output.records[1].date, date(2024, 1, 8));
    }
}
