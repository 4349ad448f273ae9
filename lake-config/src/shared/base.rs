use chrono::NaiveDate;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Neither a fixed chunk count nor a chunk size was configured.
    #[error("one of `reorg.chunk_count` or `reorg.chunk_size` must be set")]
    MissingChunking,
    /// The expected date range ends before it starts.
    #[error("invalid expected date range: `{end}` is before `{start}`")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    /// Validation was requested without any target.
    #[error("`validation.targets` cannot be empty")]
    NoValidationTargets,
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, constraint: &str) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: constraint.to_string(),
        }
    }
}
