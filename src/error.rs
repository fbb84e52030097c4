//! Error taxonomy shared by the kernel, the estimators and the cube applier.
//!
//! Configuration-level errors (`InvalidInput`, `InvalidParameter`,
//! `UnknownParameter`) are fatal and raised before any per-series work.
//! `InsufficientData` and `SingularSystem` are per-series and are either
//! recorded as diagnostics or escalated, depending on the failure mode.

use std::fmt;

/// Crate-wide error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Shape or axis mismatch, unresolvable timestamp order, bad cadence.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fewer weighted observations than the difference order requires.
    #[error("insufficient data: need at least {required} weighted observations, got {actual}")]
    InsufficientData {
        /// `order + 1`.
        required: usize,
        /// Observations carrying nonzero weight.
        actual: usize,
    },

    /// The banded factorization broke down even after the ridge retry.
    #[error("singular system: non-positive pivot at row {pivot}")]
    SingularSystem { pivot: usize },

    /// A configuration key outside the declared schema.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// A known configuration key with an unacceptable value.
    #[error("invalid value for parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A per-series failure escalated by strict mode.
    #[error("series at index {index:?} failed: {source}")]
    Series {
        index: Vec<usize>,
        #[source]
        source: Box<Error>,
    },

    /// The run was cancelled before every chunk was processed.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn parameter(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter { name: name.to_string(), reason: reason.into() }
    }

    /// Flat classification used in lenient-mode diagnostics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::InsufficientData { .. } => ErrorKind::InsufficientData,
            Error::SingularSystem { .. } => ErrorKind::SingularSystem,
            Error::UnknownParameter(_) => ErrorKind::UnknownParameter,
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::Series { source, .. } => source.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Classification of an [`Error`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    InvalidInput,
    InsufficientData,
    SingularSystem,
    UnknownParameter,
    InvalidParameter,
    Cancelled,
}

impl ErrorKind {
    /// True for failures that lenient mode isolates to one series.
    pub fn is_per_series(self) -> bool {
        matches!(self, ErrorKind::InsufficientData | ErrorKind::SingularSystem)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::InsufficientData => "InsufficientData",
            ErrorKind::SingularSystem => "SingularSystem",
            ErrorKind::UnknownParameter => "UnknownParameter",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_error_reports_inner_kind() {
        let e = Error::Series {
            index: vec![3, 1],
            source: Box::new(Error::InsufficientData { required: 3, actual: 2 }),
        };
        assert_eq!(e.kind(), ErrorKind::InsufficientData);
        assert!(e.kind().is_per_series());
        assert!(e.to_string().contains("[3, 1]"));
    }

    #[test]
    fn configuration_errors_are_not_per_series() {
        assert!(!Error::UnknownParameter("foo".into()).kind().is_per_series());
        assert!(!Error::invalid("bad").kind().is_per_series());
        assert!(Error::SingularSystem { pivot: 0 }.kind().is_per_series());
    }
}
