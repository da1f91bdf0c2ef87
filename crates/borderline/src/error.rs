use std::fmt;

use crate::translate::ControlSignal;

/// Marker meaning "the interpreter's error slot holds the error for this call".
///
/// Carries no payload: the authoritative error lives in the foreign runtime and is reported by
/// returning control to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorAlreadySet;

impl fmt::Display for ErrorAlreadySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("foreign error already set")
    }
}

impl std::error::Error for ErrorAlreadySet {}

/// Error returned by the rethrowing calling convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    /// The call failed and its error is installed in the interpreter's error slot.
    ErrorAlreadySet,
    /// A control signal crossed the boundary and must keep propagating unmodified.
    Control(ControlSignal),
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorAlreadySet => write!(f, "{ErrorAlreadySet}"),
            Self::Control(signal) => write!(f, "control signal: {signal}"),
        }
    }
}

impl std::error::Error for BoundaryError {}

impl From<ErrorAlreadySet> for BoundaryError {
    fn from(_: ErrorAlreadySet) -> Self {
        Self::ErrorAlreadySet
    }
}

impl From<ControlSignal> for BoundaryError {
    fn from(signal: ControlSignal) -> Self {
        Self::Control(signal)
    }
}

/// Returned when a warning buffer is installed while another one is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferInstallError {
    /// The active buffer belongs to the calling thread: a boundary call inside another one.
    Nested,
    /// The active buffer belongs to a different thread that is mid-call.
    Concurrent,
}

impl fmt::Display for BufferInstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested => f.write_str(
                "a warning buffer is already installed on this thread; nested boundary calls are not supported",
            ),
            Self::Concurrent => f.write_str(
                "a warning buffer is installed by another thread; concurrent boundary calls are not supported",
            ),
        }
    }
}

impl std::error::Error for BufferInstallError {}

/// Error loading a [`BoundaryConfig`](crate::BoundaryConfig).
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration text was not valid JSON for the expected shape.
    Json(serde_json::Error),
    /// A message substitution with an empty pattern, which would match everywhere.
    EmptyPattern {
        /// Position of the offending entry in `substitutions`.
        index: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(error) => write!(f, "invalid boundary config: {error}"),
            Self::EmptyPattern { index } => {
                write!(f, "invalid boundary config: substitution {index} has an empty pattern")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(error) => Some(error),
            Self::EmptyPattern { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error)
    }
}
