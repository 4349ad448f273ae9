//! Per-chunk profiling shared by the organized and table checks.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::hash::{EntityHasher, SkewStats};
use crate::types::{ChunkId, Observation};
use crate::validate::expected::ExpectedDates;
use crate::validate::report::{FindingKind, ValidationReport};

/// Distinct dates per entity of one chunk, built incrementally from record batches.
#[derive(Debug, Default)]
pub struct ChunkProfile {
    dates: HashMap<String, BTreeSet<NaiveDate>>,
    rows: u64,
    duplicates: u64,
}

impl ChunkProfile {
    pub fn add(&mut self, records: &[Observation]) {
        for record in records {
            self.rows += 1;
            let inserted = match self.dates.get_mut(&record.parcel_id) {
                Some(dates) => dates.insert(record.date),
                None => {
                    self.dates
                        .insert(record.parcel_id.clone(), BTreeSet::from([record.date]));
                    true
                }
            };
            if !inserted {
                self.duplicates += 1;
            }
        }
    }

    /// Checks completeness, routing and uniqueness of the chunk.
    pub fn finish(
        self,
        chunk: ChunkId,
        hasher: &EntityHasher,
        expected: &ExpectedDates,
    ) -> ChunkScan {
        let mut findings = Vec::new();
        if self.duplicates > 0 {
            findings.push(FindingKind::DuplicateRecords {
                chunk,
                count: self.duplicates,
            });
        }

        let mut entities: Vec<String> = Vec::with_capacity(self.dates.len());
        for (entity, dates) in self.dates {
            let (missing_count, extra_count) = expected.compare(&dates);
            if missing_count > 0 {
                findings.push(FindingKind::MissingDates {
                    entity: entity.clone(),
                    chunk,
                    missing_count,
                });
            }
            if extra_count > 0 {
                findings.push(FindingKind::ExtraDates {
                    entity: entity.clone(),
                    chunk,
                    extra_count,
                });
            }

            let expected_chunk = hasher.chunk_of(&entity);
            if expected_chunk != chunk {
                findings.push(FindingKind::MisroutedEntity {
                    entity: entity.clone(),
                    chunk,
                    expected_chunk,
                });
            }

            entities.push(entity);
        }
        entities.sort_unstable();

        ChunkScan {
            rows: self.rows,
            entities,
            findings,
        }
    }
}

/// Result of checking one chunk in isolation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkScan {
    pub rows: u64,
    /// Distinct entities, sorted.
    pub entities: Vec<String>,
    pub findings: Vec<FindingKind>,
}

/// Global `entity -> chunk` map detecting entities stored in more than one chunk.
#[derive(Debug, Default)]
pub struct ExclusivityTracker {
    owners: HashMap<String, ChunkId>,
    entity_counts: Vec<(ChunkId, u64)>,
}

impl ExclusivityTracker {
    /// Records the entities of `chunk`, returning an overlap finding per entity already owned
    /// by another chunk.
    pub fn observe(&mut self, chunk: ChunkId, entities: Vec<String>) -> Vec<FindingKind> {
        let mut overlaps = Vec::new();
        self.entity_counts.push((chunk, entities.len() as u64));

        for entity in entities {
            match self.owners.entry(entity) {
                Entry::Occupied(entry) => {
                    let owner = *entry.get();
                    if owner != chunk {
                        overlaps.push(FindingKind::ParcelOverlap {
                            entity: entry.key().clone(),
                            chunk_a: owner.min(chunk),
                            chunk_b: owner.max(chunk),
                        });
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(chunk);
                }
            }
        }

        overlaps
    }

    pub fn distinct_entities(&self) -> u64 {
        self.owners.len() as u64
    }

    pub fn skew(&self) -> Option<SkewStats> {
        SkewStats::from_counts(self.entity_counts.iter().copied())
    }
}

/// Adds a skew finding when the largest chunk exceeds `threshold` times the mean.
pub fn push_skew_finding(
    report: &mut ValidationReport,
    skew: Option<SkewStats>,
    threshold: f64,
    fail_threshold: Option<f64>,
) {
    let Some(skew) = skew else {
        return;
    };

    if skew.exceeds(threshold) {
        report.push(FindingKind::ChunkSkew {
            chunk: skew.max_chunk,
            entities: skew.max,
            mean: skew.mean,
            ratio: skew.ratio,
            over_limit: fail_threshold.is_some_and(|limit| skew.exceeds(limit)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, observation};

    #[test]
    fn profile_reports_incomplete_and_duplicate_entities() {
        let hasher = EntityHasher::new(1).unwrap();
        let expected = ExpectedDates::new([date(2024, 1, 1), date(2024, 1, 8)]);

        let mut profile = ChunkProfile::default();
        profile.add(&[
            observation("p1", date(2024, 1, 1), 1.0),
            observation("p1", date(2024, 1, 8), 1.0),
            observation("p2", date(2024, 1, 1), 1.0),
            observation("p2", date(2024, 1, 1), 2.0),
        ]);
        let scan = profile.finish(ChunkId(0), &hasher, &expected);

        assert_eq!(scan.rows, 4);
        assert_eq!(scan.entities, vec!["p1".to_string(), "p2".to_string()]);
        assert!(scan.findings.contains(&FindingKind::DuplicateRecords {
            chunk: ChunkId(0),
            count: 1
        }));
        assert!(scan.findings.contains(&FindingKind::MissingDates {
            entity: "p2".to_string(),
            chunk: ChunkId(0),
            missing_count: 1
        }));
        assert_eq!(scan.findings.len(), 2);
    }

    #[test]
    fn overlap_names_both_chunks() {
        let mut tracker = ExclusivityTracker::default();
        assert!(
            tracker
                .observe(ChunkId(2), vec!["p1".to_string(), "p2".to_string()])
                .is_empty()
        );

        let overlaps = tracker.observe(ChunkId(0), vec!["p2".to_string()]);
        assert_eq!(
            overlaps,
            vec![FindingKind::ParcelOverlap {
                entity: "p2".to_string(),
                chunk_a: ChunkId(0),
                chunk_b: ChunkId(2),
            }]
        );
        assert_eq!(tracker.distinct_entities(), 2);
    }
}
