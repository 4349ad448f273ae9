//! Validation suites for the raw, organized and table representations.
//!
//! Each suite produces a [`ValidationReport`] of typed findings. A report passes when it holds
//! no error-severity finding.

pub mod chunks;
pub mod expected;
pub mod organized;
pub mod raw;
pub mod report;
pub mod table;
pub mod validator;

pub use expected::ExpectedDates;
pub use report::{
    Finding, FindingKind, ReportStats, Representation, Severity, ValidationReport,
    ValidationSummary,
};
pub use validator::{Validator, ValidatorOptions};
