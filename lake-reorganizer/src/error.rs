use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use lake::error::LakeError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for reorganizer operations.
pub type ReorganizerResult<T> = Result<T, ReorganizerError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the reorganizer binary.
///
/// Wraps [`LakeError`] for pipeline errors and provides variants for startup errors.
#[derive(Debug)]
pub enum ReorganizerError {
    /// Pipeline error.
    Lake(LakeError),
    /// Configuration or telemetry setup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, for example while building the runtime.
    Io(std::io::Error, CapturedBacktrace),
}

impl ReorganizerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReorganizerError::Lake(_) => "pipeline error",
            ReorganizerError::Config(_, _) => "configuration error",
            ReorganizerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReorganizerError::Lake(err) => err.backtrace(),
            ReorganizerError::Config(_, cb) => Some(&cb.0),
            ReorganizerError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error type.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReorganizerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("reorganizer failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        // Aggregated lake errors already list their members in the display output.
        if !matches!(self, ReorganizerError::Lake(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ReorganizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReorganizerError::Lake(err) => write!(f, "{err}"),
            ReorganizerError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReorganizerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ReorganizerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReorganizerError::Lake(err) => err.source(),
            ReorganizerError::Config(source, _) => Some(source.as_ref()),
            ReorganizerError::Io(source, _) => Some(source),
        }
    }
}

impl From<LakeError> for ReorganizerError {
    fn from(err: LakeError) -> Self {
        ReorganizerError::Lake(err)
    }
}

impl From<std::io::Error> for ReorganizerError {
    fn from(err: std::io::Error) -> Self {
        ReorganizerError::Io(err, CapturedBacktrace::capture())
    }
}
