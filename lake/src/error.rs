//! Error types and result definitions for lake operations.
//!
//! [`LakeError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, the originating error and the call site where it was raised. Failures of
//! several independent units (raw inputs, chunks, partitions) aggregate into one error.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for lake operations.
pub type LakeResult<T> = Result<T, LakeError>;

/// Detailed payload stored for single [`LakeError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for lake operations.
#[derive(Debug, Clone)]
pub struct LakeError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several units collected by a phase.
    Many {
        errors: Vec<LakeError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures raised by the engine.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A raw input is missing, unreadable or has an unexpected schema.
    InputReadError,
    /// The chunk count is not usable for hashing.
    HashConfigError,
    /// A chunk could not be written completely.
    FlushError,
    /// The table store rejected or failed a partition commit.
    CommitError,
    /// A table partition exists but cannot be read back.
    PartitionReadError,

    ConfigError,
    InvalidData,
    InvalidState,

    IoError,
    SerializationError,
    DeserializationError,

    WorkerPanic,
    Cancelled,

    Unknown,
}

impl LakeError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail, or the first available detail of an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns a one-line reason combining description and detail.
    pub fn reason(&self) -> String {
        match self.detail() {
            Some(detail) => format!("{}: {detail}", self.description()),
            None => self.description().to_string(),
        }
    }

    /// Returns the aggregated errors when this error collects several failures.
    pub fn errors(&self) -> Option<&[LakeError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for single errors.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the call site that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        LakeError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        LakeError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for LakeError {
    fn eq(&self, other: &LakeError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LakeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`LakeError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for LakeError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> LakeError {
        LakeError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`LakeError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for LakeError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> LakeError {
        LakeError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates several errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for LakeError
where
    E: Into<LakeError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> LakeError {
        let location = Location::caller();
        let mut errors: Vec<LakeError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        LakeError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for LakeError {
    #[track_caller]
    fn from(err: std::io::Error) -> LakeError {
        LakeError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for LakeError {
    #[track_caller]
    fn from(err: serde_json::Error) -> LakeError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        LakeError::from_source(kind, description, err)
    }
}

/// Parquet failures are data problems unless they wrap an I/O error.
impl From<parquet::errors::ParquetError> for LakeError {
    #[track_caller]
    fn from(err: parquet::errors::ParquetError) -> LakeError {
        match err {
            parquet::errors::ParquetError::External(inner) => LakeError::from_components(
                ErrorKind::IoError,
                Cow::Borrowed("Parquet I/O failed"),
                Some(Cow::Owned(inner.to_string())),
                None,
            ),
            err => LakeError::from_source(ErrorKind::InvalidData, "Parquet operation failed", err),
        }
    }
}

impl From<arrow::error::ArrowError> for LakeError {
    #[track_caller]
    fn from(err: arrow::error::ArrowError) -> LakeError {
        let kind = match err {
            arrow::error::ArrowError::IoError(..) => ErrorKind::IoError,
            _ => ErrorKind::InvalidData,
        };

        LakeError::from_source(kind, "Arrow operation failed", err)
    }
}

impl From<walkdir::Error> for LakeError {
    #[track_caller]
    fn from(err: walkdir::Error) -> LakeError {
        LakeError::from_source(ErrorKind::IoError, "Directory traversal failed", err)
    }
}

/// A blocking task that did not finish is either a panic or a cancellation.
impl From<tokio::task::JoinError> for LakeError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> LakeError {
        let (kind, description) = if err.is_cancelled() {
            (ErrorKind::Cancelled, "Task was cancelled")
        } else {
            (ErrorKind::WorkerPanic, "Task panicked")
        };

        LakeError::from_source(kind, description, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lake_error;

    #[test]
    fn aggregate_of_one_is_unwrapped() {
        let err: LakeError = vec![lake_error!(ErrorKind::FlushError, "Chunk flush failed")].into();

        assert_eq!(err.kind(), ErrorKind::FlushError);
        assert!(err.errors().is_none());
    }

    #[test]
    fn aggregate_reports_all_kinds() {
        let err: LakeError = vec![
            lake_error!(ErrorKind::FlushError, "Chunk flush failed", "chunk 1"),
            lake_error!(ErrorKind::CommitError, "Partition commit failed", "chunk 2"),
        ]
        .into();

        assert_eq!(err.kind(), ErrorKind::FlushError);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::FlushError, ErrorKind::CommitError]
        );
        assert_eq!(err.errors().map(|errors| errors.len()), Some(2));
        assert_eq!(err.detail(), Some("chunk 1"));
    }

    #[test]
    fn display_includes_detail_and_location() {
        let err = lake_error!(
            ErrorKind::HashConfigError,
            "Invalid chunk count",
            "chunk count must be greater than zero"
        );
        let rendered = err.to_string();

        assert!(rendered.starts_with("[HashConfigError] Invalid chunk count @ "));
        assert!(rendered.contains("error.rs"));
        assert!(rendered.contains("chunk count must be greater than zero"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: LakeError = std::io::Error::other("disk full").into();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(error::Error::source(&err).is_some());
    }
}
