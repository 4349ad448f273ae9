use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::ChunkId;

/// Representation a check ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    Raw,
    Organized,
    Table,
}

impl Representation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Representation::Raw => "raw",
            Representation::Organized => "organized",
            Representation::Table => "table",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// What a check found wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    /// A tile does not hold the configured number of distinct entities.
    UnexpectedEntityCount {
        tile: String,
        expected: u64,
        found: u64,
    },
    /// Files of one tile hold different numbers of entities.
    InconsistentEntityCounts { tile: String, min: u64, max: u64 },
    /// A raw file holds dates other than the one of its partition.
    DateInconsistency {
        path: PathBuf,
        partition_date: NaiveDate,
        min: NaiveDate,
        max: NaiveDate,
    },
    UnreadableInput { path: PathBuf, reason: String },
    /// Nothing to check at the given location.
    EmptyRepresentation { reason: String },
    MissingDates {
        entity: String,
        chunk: ChunkId,
        missing_count: usize,
    },
    ExtraDates {
        entity: String,
        chunk: ChunkId,
        extra_count: usize,
    },
    /// An entity found in two chunks; `chunk_a < chunk_b`.
    ParcelOverlap {
        entity: String,
        chunk_a: ChunkId,
        chunk_b: ChunkId,
    },
    MisroutedEntity {
        entity: String,
        chunk: ChunkId,
        expected_chunk: ChunkId,
    },
    DuplicateRecords { chunk: ChunkId, count: u64 },
    MissingChunkFile { chunk: ChunkId },
    MissingPartition { chunk: ChunkId },
    UnexpectedPartition { name: String },
    CorruptPartition { chunk: ChunkId, reason: String },
    RowCountMismatch {
        chunk: ChunkId,
        organized: u64,
        table: u64,
    },
    /// The largest chunk holds `ratio` times the mean entity count.
    ChunkSkew {
        chunk: ChunkId,
        entities: u64,
        mean: f64,
        ratio: f64,
        /// Whether the ratio is above the configured failure limit.
        over_limit: bool,
    },
}

impl FindingKind {
    pub fn name(&self) -> &'static str {
        match self {
            FindingKind::UnexpectedEntityCount { .. } => "unexpected_entity_count",
            FindingKind::InconsistentEntityCounts { .. } => "inconsistent_entity_counts",
            FindingKind::DateInconsistency { .. } => "date_inconsistency",
            FindingKind::UnreadableInput { .. } => "unreadable_input",
            FindingKind::EmptyRepresentation { .. } => "empty_representation",
            FindingKind::MissingDates { .. } => "missing_dates",
            FindingKind::ExtraDates { .. } => "extra_dates",
            FindingKind::ParcelOverlap { .. } => "parcel_overlap",
            FindingKind::MisroutedEntity { .. } => "misrouted_entity",
            FindingKind::DuplicateRecords { .. } => "duplicate_records",
            FindingKind::MissingChunkFile { .. } => "missing_chunk_file",
            FindingKind::MissingPartition { .. } => "missing_partition",
            FindingKind::UnexpectedPartition { .. } => "unexpected_partition",
            FindingKind::CorruptPartition { .. } => "corrupt_partition",
            FindingKind::RowCountMismatch { .. } => "row_count_mismatch",
            FindingKind::ChunkSkew { .. } => "chunk_skew",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::InconsistentEntityCounts { .. } => Severity::Warning,
            FindingKind::ChunkSkew { over_limit, .. } if !over_limit => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// The entity, chunk, tile or path the finding is about.
    pub fn subject(&self) -> String {
        match self {
            FindingKind::UnexpectedEntityCount { tile, .. }
            | FindingKind::InconsistentEntityCounts { tile, .. } => format!("tile {tile}"),
            FindingKind::DateInconsistency { path, .. }
            | FindingKind::UnreadableInput { path, .. } => path.display().to_string(),
            FindingKind::EmptyRepresentation { .. } => "-".to_string(),
            FindingKind::MissingDates { entity, .. }
            | FindingKind::ExtraDates { entity, .. }
            | FindingKind::ParcelOverlap { entity, .. }
            | FindingKind::MisroutedEntity { entity, .. } => entity.clone(),
            FindingKind::DuplicateRecords { chunk, .. }
            | FindingKind::MissingChunkFile { chunk }
            | FindingKind::MissingPartition { chunk }
            | FindingKind::CorruptPartition { chunk, .. }
            | FindingKind::RowCountMismatch { chunk, .. }
            | FindingKind::ChunkSkew { chunk, .. } => format!("chunk {chunk}"),
            FindingKind::UnexpectedPartition { name } => name.clone(),
        }
    }

    /// Human readable description of the finding.
    pub fn detail(&self) -> String {
        match self {
            FindingKind::UnexpectedEntityCount {
                expected, found, ..
            } => format!("expected {expected} distinct entities, found {found}"),
            FindingKind::InconsistentEntityCounts { min, max, .. } => {
                format!("files hold between {min} and {max} entities")
            }
            FindingKind::DateInconsistency {
                partition_date,
                min,
                max,
                ..
            } => format!("partition date {partition_date}, data spans {min} to {max}"),
            FindingKind::UnreadableInput { reason, .. } => reason.clone(),
            FindingKind::EmptyRepresentation { reason } => reason.clone(),
            FindingKind::MissingDates {
                chunk,
                missing_count,
                ..
            } => format!("{missing_count} expected dates missing in chunk {chunk}"),
            FindingKind::ExtraDates {
                chunk, extra_count, ..
            } => format!("{extra_count} dates outside the expected set in chunk {chunk}"),
            FindingKind::ParcelOverlap {
                chunk_a, chunk_b, ..
            } => format!("present in chunks {chunk_a} and {chunk_b}"),
            FindingKind::MisroutedEntity {
                chunk,
                expected_chunk,
                ..
            } => format!("stored in chunk {chunk}, hashes to chunk {expected_chunk}"),
            FindingKind::DuplicateRecords { count, .. } => {
                format!("{count} duplicate (parcel_id, date) records")
            }
            FindingKind::MissingChunkFile { .. } => "chunk has no data file".to_string(),
            FindingKind::MissingPartition { .. } => "partition does not exist".to_string(),
            FindingKind::UnexpectedPartition { .. } => {
                "entry does not belong to the chunk range".to_string()
            }
            FindingKind::CorruptPartition { reason, .. } => reason.clone(),
            FindingKind::RowCountMismatch {
                organized, table, ..
            } => format!(
                "organized chunk has {organized} distinct records, table partition has {table} rows"
            ),
            FindingKind::ChunkSkew {
                entities,
                mean,
                ratio,
                ..
            } => format!("{entities} entities, {ratio:.2}x the mean of {mean:.1}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub representation: Representation,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: FindingKind,
}

impl Finding {
    pub fn new(representation: Representation, kind: FindingKind) -> Self {
        Self {
            representation,
            severity: kind.severity(),
            kind,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "{severity} [{}] {}: {}",
            self.kind.name(),
            self.kind.subject(),
            self.kind.detail()
        )
    }
}

/// Size of the checked representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub files: u64,
    pub rows: u64,
    pub entities: u64,
    pub chunks: u64,
    pub dates: u64,
}

/// Findings of one check suite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub representation: Representation,
    pub findings: Vec<Finding>,
    pub stats: ReportStats,
}

impl ValidationReport {
    pub fn new(representation: Representation) -> Self {
        Self {
            representation,
            findings: Vec::new(),
            stats: ReportStats::default(),
        }
    }

    pub fn push(&mut self, kind: FindingKind) {
        self.findings.push(Finding::new(self.representation, kind));
    }

    /// Orders findings by kind, then subject, so reports are reproducible.
    pub fn sort(&mut self) {
        self.findings.sort_by_cached_key(|finding| {
            (
                finding.kind.name(),
                finding.kind.subject(),
                finding.kind.detail(),
            )
        });
    }

    /// Whether the report holds no error finding. Warnings do not fail a report.
    pub fn passed(&self) -> bool {
        !self.findings.iter().any(Finding::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings.len() - self.error_count()
    }

    /// Returns the findings of the kind called `name`.
    pub fn findings_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings
            .iter()
            .filter(move |finding| finding.kind.name() == name)
    }

    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.kind.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Renders the report as text; individual findings are listed only when `verbose`.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        out.push_str(&format!(
            "[{}] {status}: {} files, {} chunks, {} rows, {} entities, {} dates; {} errors, {} warnings\n",
            self.representation,
            self.stats.files,
            self.stats.chunks,
            self.stats.rows,
            self.stats.entities,
            self.stats.dates,
            self.error_count(),
            self.warning_count()
        ));

        for (kind, count) in self.counts_by_kind() {
            out.push_str(&format!("  {kind}: {count}\n"));
        }

        if verbose {
            for finding in &self.findings {
                out.push_str(&format!("    {finding}\n"));
            }
        }

        out
    }
}

/// Reports of every suite of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub reports: Vec<ValidationReport>,
}

impl ValidationSummary {
    pub fn passed(&self) -> bool {
        self.reports.iter().all(ValidationReport::passed)
    }

    pub fn report(&self, representation: Representation) -> Option<&ValidationReport> {
        self.reports
            .iter()
            .find(|report| report.representation == representation)
    }

    pub fn render(&self, verbose: bool) -> String {
        self.reports
            .iter()
            .map(|report| report.render(verbose))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail_a_report() {
        let mut report = ValidationReport::new(Representation::Organized);
        report.push(FindingKind::ChunkSkew {
            chunk: ChunkId(3),
            entities: 40,
            mean: 20.0,
            ratio: 2.0,
            over_limit: false,
        });
        assert!(report.passed());
        assert_eq!(report.warning_count(), 1);

        report.push(FindingKind::ParcelOverlap {
            entity: "p1".to_string(),
            chunk_a: ChunkId(0),
            chunk_b: ChunkId(1),
        });
        assert!(!report.passed());
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn render_lists_findings_only_when_verbose() {
        let mut report = ValidationReport::new(Representation::Table);
        report.push(FindingKind::MissingPartition { chunk: ChunkId(2) });

        let summary = report.render(false);
        assert!(summary.starts_with("[table] FAILED"));
        assert!(summary.contains("missing_partition: 1"));
        assert!(!summary.contains("partition does not exist"));

        let verbose = report.render(true);
        assert!(verbose.contains("error [missing_partition] chunk 2: partition does not exist"));
    }

    #[test]
    fn findings_serialize_with_their_kind() {
        let finding = Finding::new(
            Representation::Organized,
            FindingKind::MissingDates {
                entity: "p1".to_string(),
                chunk: ChunkId(1),
                missing_count: 2,
            },
        );

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "missing_dates");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["missing_count"], 2);
    }
}
