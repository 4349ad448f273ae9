use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Days, NaiveDate};
use lake_config::shared::ExpectedDatesConfig;

use crate::bail;
use crate::error::{ErrorKind, LakeResult};
use crate::layout::raw::RawLayout;

/// The dates every entity must have a record for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDates(BTreeSet<NaiveDate>);

impl ExpectedDates {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self(dates.into_iter().collect())
    }

    /// Resolves the configured source, scanning the raw layout under `raw_dir` when inferred.
    pub fn resolve(config: &ExpectedDatesConfig, raw_dir: &Path) -> LakeResult<Self> {
        let dates = match config {
            ExpectedDatesConfig::Explicit { dates } => Self::new(dates.iter().copied()),
            ExpectedDatesConfig::Range {
                start,
                end,
                interval_days,
            } => Self::range(*start, *end, *interval_days)?,
            ExpectedDatesConfig::Inferred => {
                Self(RawLayout::discover(raw_dir)?.available_dates())
            }
        };

        if dates.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Expected date set is empty",
                format!("source {config:?}")
            );
        }

        Ok(dates)
    }

    /// Dates from `start` to `end` inclusive, `interval_days` apart.
    pub fn range(start: NaiveDate, end: NaiveDate, interval_days: u32) -> LakeResult<Self> {
        if interval_days == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Invalid expected date interval",
                "interval must be at least one day"
            );
        }

        let mut dates = BTreeSet::new();
        let mut current = Some(start);
        while let Some(date) = current
            && date <= end
        {
            dates.insert(date);
            current = date.checked_add_days(Days::new(u64::from(interval_days)));
        }

        Ok(Self(dates))
    }

    pub fn dates(&self) -> &BTreeSet<NaiveDate> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Counts expected dates absent from `present` and present dates that are not expected.
    pub fn compare(&self, present: &BTreeSet<NaiveDate>) -> (usize, usize) {
        let missing = self.0.difference(present).count();
        let extra = present.difference(&self.0).count();
        (missing, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RawFixture, date};

    #[test]
    fn ranges_step_by_interval_and_include_the_end() {
        let dates = ExpectedDates::range(date(2024, 1, 1), date(2024, 1, 15), 7).unwrap();
        assert_eq!(
            dates.dates().iter().copied().collect::<Vec<_>>(),
            vec![date(2024, 1, 1), date(2024, 1, 8), date(2024, 1, 15)]
        );

        let dates = ExpectedDates::range(date(2024, 1, 1), date(2024, 1, 14), 7).unwrap();
        assert_eq!(dates.len(), 2);
    }

    #[test]
    fn inferred_dates_come_from_the_raw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = RawFixture::new(dir.path());
        fixture.write_grid("32TNS", &["p1"], &[date(2024, 1, 1), date(2024, 1, 8)]);
        fixture.write_grid("33UUP", &["p2"], &[date(2024, 1, 8)]);

        let dates = ExpectedDates::resolve(&ExpectedDatesConfig::Inferred, dir.path()).unwrap();
        assert_eq!(dates, ExpectedDates::new([date(2024, 1, 1), date(2024, 1, 8)]));
    }

    #[test]
    fn comparison_counts_missing_and_extra_dates() {
        let expected = ExpectedDates::new([date(2024, 1, 1), date(2024, 1, 8)]);
        let present = BTreeSet::from([date(2024, 1, 8), date(2024, 1, 9)]);

        assert_eq!(expected.compare(&present), (1, 1));
    }

    #[test]
    fn empty_inferred_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExpectedDates::resolve(&ExpectedDatesConfig::Inferred, dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
