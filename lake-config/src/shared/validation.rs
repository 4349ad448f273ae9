use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Representation a validation suite runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTarget {
    Raw,
    Organized,
    Table,
}

/// Source of the dates every entity is expected to have.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ExpectedDatesConfig {
    /// Distinct `date=` partitions found in the raw layout.
    #[default]
    Inferred,
    /// An explicit list of dates.
    Explicit { dates: Vec<NaiveDate> },
    /// Every `interval_days` from `start` up to and including `end`.
    Range {
        start: NaiveDate,
        end: NaiveDate,
        #[serde(default = "default_interval_days")]
        interval_days: u32,
    },
}

/// Settings for the validation suites.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Suites to run, in order.
    #[serde(default = "default_targets")]
    pub targets: Vec<ValidationTarget>,
    /// Distinct entities expected in every tile of the raw layout.
    #[serde(default)]
    pub expected_entities_per_tile: Option<u64>,
    /// Reference date set for completeness checks.
    #[serde(default)]
    pub expected_dates: ExpectedDatesConfig,
    /// Include every finding in rendered output rather than only counts.
    #[serde(default)]
    pub verbose: bool,
    /// Largest chunk to mean chunk entity ratio above which a skew warning is reported.
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold: f64,
    /// Ratio above which skew becomes an error. Unset means skew never fails a report.
    #[serde(default)]
    pub skew_fail_threshold: Option<f64>,
    /// Compare table partition row counts with organized chunk row counts.
    #[serde(default = "default_cross_check")]
    pub cross_check: bool,
}

impl ValidationConfig {
    pub const DEFAULT_INTERVAL_DAYS: u32 = 7;

    pub const DEFAULT_SKEW_THRESHOLD: f64 = 1.5;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.targets.is_empty() {
            return Err(ValidationError::NoValidationTargets);
        }

        if let ExpectedDatesConfig::Range {
            start,
            end,
            interval_days,
        } = &self.expected_dates
        {
            if end < start {
                return Err(ValidationError::InvalidDateRange {
                    start: *start,
                    end: *end,
                });
            }

            if *interval_days == 0 {
                return Err(ValidationError::invalid(
                    "validation.expected_dates.interval_days",
                    "must be greater than 0",
                ));
            }
        }

        if self.skew_threshold.is_nan() || self.skew_threshold < 1.0 {
            return Err(ValidationError::invalid(
                "validation.skew_threshold",
                "must be at least 1.0",
            ));
        }

        if let Some(fail_threshold) = self.skew_fail_threshold
            && (fail_threshold.is_nan() || fail_threshold < self.skew_threshold)
        {
            return Err(ValidationError::invalid(
                "validation.skew_fail_threshold",
                "must be at least `validation.skew_threshold`",
            ));
        }

        Ok(())
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            expected_entities_per_tile: None,
            expected_dates: ExpectedDatesConfig::default(),
            verbose: false,
            skew_threshold: default_skew_threshold(),
            skew_fail_threshold: None,
            cross_check: default_cross_check(),
        }
    }
}

fn default_targets() -> Vec<ValidationTarget> {
    vec![
        ValidationTarget::Raw,
        ValidationTarget::Organized,
        ValidationTarget::Table,
    ]
}

fn default_interval_days() -> u32 {
    ValidationConfig::DEFAULT_INTERVAL_DAYS
}

fn default_skew_threshold() -> f64 {
    ValidationConfig::DEFAULT_SKEW_THRESHOLD
}

fn default_cross_check() -> bool {
    true
}
