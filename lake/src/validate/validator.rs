use std::path::PathBuf;
use std::sync::Arc;

use lake_config::shared::{ExpectedDatesConfig, LakeConfig, ValidationTarget};
use tracing::{error, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::LakeResult;
use crate::hash::EntityHasher;
use crate::table::base::TableStore;
use crate::validate::expected::ExpectedDates;
use crate::validate::organized::check_organized;
use crate::validate::raw::check_raw;
use crate::validate::report::{ValidationReport, ValidationSummary};
use crate::validate::table::check_table;

/// Everything the validation suites need to know about the lake under test.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorOptions {
    pub raw_dir: PathBuf,
    pub organized_dir: PathBuf,
    pub chunk_count: u32,
    pub expected_dates: ExpectedDatesConfig,
    pub expected_entities_per_tile: Option<u64>,
    pub skew_threshold: f64,
    pub skew_fail_threshold: Option<f64>,
    /// Compare table partition row counts with the organized chunk files.
    pub cross_check: bool,
    pub batch_size: usize,
    pub workers: usize,
}

impl ValidatorOptions {
    pub fn new(raw_dir: PathBuf, organized_dir: PathBuf, chunk_count: u32) -> Self {
        Self {
            raw_dir,
            organized_dir,
            chunk_count,
            expected_dates: ExpectedDatesConfig::Inferred,
            expected_entities_per_tile: None,
            skew_threshold: 1.5,
            skew_fail_threshold: None,
            cross_check: false,
            batch_size: 8192,
            workers: 1,
        }
    }

    pub fn from_config(config: &LakeConfig, chunk_count: u32) -> Self {
        let validation = &config.validation;
        Self {
            raw_dir: config.paths.raw_dir.clone(),
            organized_dir: config.paths.organized_dir.clone(),
            chunk_count,
            expected_dates: validation.expected_dates.clone(),
            expected_entities_per_tile: validation.expected_entities_per_tile,
            skew_threshold: validation.skew_threshold,
            skew_fail_threshold: validation.skew_fail_threshold,
            cross_check: validation.cross_check,
            batch_size: config.reorg.batch_size,
            workers: config.workers(),
        }
    }
}

/// Runs the raw, organized and table validation suites.
#[derive(Debug, Clone)]
pub struct Validator<S> {
    options: ValidatorOptions,
    store: S,
    shutdown_rx: ShutdownRx,
}

impl<S> Validator<S>
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    pub fn new(options: ValidatorOptions, store: S, shutdown_rx: ShutdownRx) -> Self {
        Self {
            options,
            store,
            shutdown_rx,
        }
    }

    /// Runs the suites of `targets` in the given order.
    ///
    /// Findings never turn into errors: a run returns `Err` only when it could not be carried out
    /// (bad chunk count, unresolvable expected dates, cancellation).
    pub async fn run(&self, targets: &[ValidationTarget]) -> LakeResult<ValidationSummary> {
        let hasher = EntityHasher::new(self.options.chunk_count)?;

        let needs_dates = targets
            .iter()
            .any(|target| !matches!(target, ValidationTarget::Raw));
        let expected = if needs_dates {
            let expected =
                ExpectedDates::resolve(&self.options.expected_dates, &self.options.raw_dir)?;
            info!(dates = expected.len(), "resolved expected dates");
            Arc::new(expected)
        } else {
            Arc::new(ExpectedDates::new(std::iter::empty()))
        };

        let mut summary = ValidationSummary::default();
        for target in targets {
            self.shutdown_rx.check()?;

            let report = self.run_suite(*target, hasher, expected.clone()).await?;
            log_report(&report);
            summary.reports.push(report);
        }

        Ok(summary)
    }

    async fn run_suite(
        &self,
        target: ValidationTarget,
        hasher: EntityHasher,
        expected: Arc<ExpectedDates>,
    ) -> LakeResult<ValidationReport> {
        info!(representation = ?target, "running validation suite");

        match target {
            ValidationTarget::Raw => {
                check_raw(
                    &self.options.raw_dir,
                    self.options.expected_entities_per_tile,
                    self.options.batch_size,
                    self.options.workers,
                    &self.shutdown_rx,
                )
                .await
            }
            ValidationTarget::Organized => {
                check_organized(
                    &self.options.organized_dir,
                    hasher,
                    expected,
                    &self.options,
                    &self.shutdown_rx,
                )
                .await
            }
            ValidationTarget::Table => {
                let cross_check_dir = self
                    .options
                    .cross_check
                    .then_some(self.options.organized_dir.as_path());
                check_table(
                    &self.store,
                    hasher,
                    expected,
                    cross_check_dir,
                    &self.options,
                    &self.shutdown_rx,
                )
                .await
            }
        }
    }
}

fn log_report(report: &ValidationReport) {
    if report.passed() {
        info!(
            representation = %report.representation,
            warnings = report.warning_count(),
            rows = report.stats.rows,
            "validation passed"
        );
        if report.warning_count() > 0 {
            warn!(
                representation = %report.representation,
                warnings = report.warning_count(),
                "validation produced warnings"
            );
        }
    } else {
        error!(
            representation = %report.representation,
            errors = report.error_count(),
            warnings = report.warning_count(),
            "validation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::table::memory::MemoryTableStore;
    use crate::test_utils::{RawFixture, date, entity_ids, weekly_dates};

    #[tokio::test(flavor = "multi_thread")]
    async fn raw_only_run_does_not_need_expected_dates() {
        let dir = TempDir::new().unwrap();
        let fixture = RawFixture::new(dir.path().join("raw"));
        let entities = entity_ids("p", 5);
        let dates = weekly_dates(date(2024, 1, 1), 3);
        fixture.write_grid("T1", &entities, &dates);

        let mut options = ValidatorOptions::new(
            dir.path().join("raw"),
            dir.path().join("organized"),
            2,
        );
        options.expected_entities_per_tile = Some(5);

        let (_tx, rx) = create_shutdown_channel();
        let validator = Validator::new(options, MemoryTableStore::new(), rx);
        let summary = validator.run(&[ValidationTarget::Raw]).await.unwrap();

        assert!(summary.passed());
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].stats.entities, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_chunk_count_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let options = ValidatorOptions::new(dir.path().join("raw"), dir.path().join("org"), 0);
        let (_tx, rx) = create_shutdown_channel();
        let validator = Validator::new(options, MemoryTableStore::new(), rx);

        assert!(validator.run(&[ValidationTarget::Raw]).await.is_err());
    }
}
