//! Native error taxonomy and its translation to foreign error types.
//!
//! Translation is a pure step: a [`NativeError`] goes in, a [`Translation`] (what to do with
//! the interpreter's error slot) comes out. Which rule applies is decided by an explicit,
//! ordered [`Selector`] table rather than by the order catch arms happen to be written in.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{config::BoundaryConfig, foreign_error::ForeignErrorState};

/// Foreign exception types a native error can be translated to.
///
/// The string representation matches the interpreter's class name exactly
/// (e.g., `IndexError` -> "IndexError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ForeignExcType {
    /// Base class of ordinary errors.
    Exception,
    /// Catch-all for native failures without a more specific mapping.
    RuntimeError,
    /// Subclass of RuntimeError.
    NotImplementedError,
    /// Sequence index out of range.
    IndexError,
    /// Mapping key not found.
    KeyError,
    /// Operation applied to a value of the wrong type.
    TypeError,
    /// Right type, inappropriate value.
    ValueError,
    /// Attribute lookup or assignment failed.
    AttributeError,
    /// Allocation failed.
    MemoryError,
    /// Arithmetic result too large to represent.
    OverflowError,
}

/// Native error types that know which foreign type they translate to.
///
/// Implement this to make a new native error kind translatable without touching the
/// translator's table; wrap values with [`NativeError::declared`].
pub trait TranslatableError: fmt::Debug + Send + Sync {
    /// Message shown to the interpreter.
    fn render_message(&self) -> String;

    /// Foreign type the error is raised as.
    fn foreign_type(&self) -> ForeignExcType;
}

/// Message used for the transient error installed while a control signal crosses the boundary.
pub const CONTROL_SIGNAL_SENTINEL: &str = "an internal control signal is in flight";

/// A non-error unwind used for dispatch inside the foreign runtime.
///
/// Control signals cross the boundary unmodified and are never reported as errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlSignal {
    payload: String,
}

impl ControlSignal {
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload)
    }
}

/// Errors a native body can return to the boundary.
#[derive(Debug)]
pub enum NativeError {
    /// The foreign error slot already describes the failure.
    ///
    /// Carries the captured state when the error was persisted (for example on another
    /// thread); `None` means the slot itself is still populated.
    AlreadySet(Option<ForeignErrorState>),
    /// Out-of-range access, raised as `IndexError`.
    Index {
        /// Description of the failed access.
        message: String,
        /// Rendered backtrace, appended when the configuration asks for it.
        backtrace: Option<String>,
    },
    /// Raised as `TypeError`.
    Type(String),
    /// Raised as `ValueError`.
    Value(String),
    /// A user-defined kind that declares its own foreign type.
    Declared(Box<dyn TranslatableError>),
    /// Any other native failure, raised as `RuntimeError`.
    Generic {
        /// Description of the failure.
        message: String,
        /// Rendered backtrace, appended when the configuration asks for it.
        backtrace: Option<String>,
    },
    /// A control signal that must cross the boundary untouched.
    ControlFlow(ControlSignal),
}

impl NativeError {
    #[must_use]
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
            backtrace: None,
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::Value(message.into())
    }

    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
            backtrace: None,
        }
    }

    /// Lowers any standard error to a generic native error, rendering its source chain.
    #[must_use]
    pub fn generic_from(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::generic(message)
    }

    #[must_use]
    pub fn declared(error: impl TranslatableError + 'static) -> Self {
        Self::Declared(Box::new(error))
    }

    #[must_use]
    pub fn control(payload: impl Into<String>) -> Self {
        Self::ControlFlow(ControlSignal::new(payload))
    }

    /// Reports that the failure is already described by the interpreter's error slot.
    #[must_use]
    pub fn already_set() -> Self {
        Self::AlreadySet(None)
    }

    /// Carries a captured foreign error, typically persisted on another thread.
    #[must_use]
    pub fn foreign(state: ForeignErrorState) -> Self {
        Self::AlreadySet(Some(state))
    }

    /// Attaches a backtrace to index and generic errors; other kinds are returned unchanged.
    #[must_use]
    pub fn with_backtrace(self, trace: impl Into<String>) -> Self {
        match self {
            Self::Index { message, .. } => Self::Index {
                message,
                backtrace: Some(trace.into()),
            },
            Self::Generic { message, .. } => Self::Generic {
                message,
                backtrace: Some(trace.into()),
            },
            other => other,
        }
    }

    /// The translation rule that applies to this error: the first entry of
    /// [`Selector::PRECEDENCE`] that matches it.
    #[must_use]
    pub fn selector(&self) -> Selector {
        Selector::PRECEDENCE
            .into_iter()
            .find(|selector| selector.matches(self))
            .unwrap_or(Selector::Generic)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySet(_) => f.write_str("foreign error already set"),
            Self::Index { message, .. } | Self::Generic { message, .. } => f.write_str(message),
            Self::Type(message) | Self::Value(message) => f.write_str(message),
            Self::Declared(error) => f.write_str(&error.render_message()),
            Self::ControlFlow(signal) => write!(f, "control signal: {signal}"),
        }
    }
}

impl std::error::Error for NativeError {}

impl From<ControlSignal> for NativeError {
    fn from(signal: ControlSignal) -> Self {
        Self::ControlFlow(signal)
    }
}

/// Translation rules, most specific first.
///
/// Rules overlap: `Generic` accepts every error that is not a control signal, so the more
/// specific rules only win because they come earlier in [`Selector::PRECEDENCE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum Selector {
    /// The interpreter's error slot already describes the failure.
    AlreadyForeign,
    /// Out-of-range access.
    Index,
    /// Kinds that name their own foreign type.
    Declared,
    /// Any remaining native error.
    Generic,
    /// Control signals, which are not errors at all.
    ControlFlow,
}

impl Selector {
    /// The order rules are consulted in.
    pub const PRECEDENCE: [Self; 5] = [
        Self::AlreadyForeign,
        Self::Index,
        Self::Declared,
        Self::Generic,
        Self::ControlFlow,
    ];

    /// Returns true when this rule can translate `error`, ignoring precedence.
    #[must_use]
    pub fn matches(self, error: &NativeError) -> bool {
        match self {
            Self::AlreadyForeign => matches!(error, NativeError::AlreadySet(_)),
            Self::Index => matches!(error, NativeError::Index { .. }),
            Self::Declared => matches!(
                error,
                NativeError::Type(_) | NativeError::Value(_) | NativeError::Declared(_)
            ),
            Self::Generic => !matches!(error, NativeError::ControlFlow(_)),
            Self::ControlFlow => matches!(error, NativeError::ControlFlow(_)),
        }
    }
}

/// What the boundary must do with the interpreter's error slot for a native error.
#[derive(Debug)]
pub enum Translation {
    /// Leave the slot alone, or restore the carried state into it.
    PassThrough(Option<ForeignErrorState>),
    /// Install a new error of the given type and message.
    Raise {
        /// Type of the error to install.
        exc_type: ForeignExcType,
        /// Message after configured substitutions.
        message: String,
    },
    /// Let the signal cross; only a transient sentinel touches the slot.
    Signal(ControlSignal),
}

/// Translates a native error according to the selector table.
#[must_use]
pub fn translate(error: NativeError, config: &BoundaryConfig) -> Translation {
    match error {
        NativeError::AlreadySet(state) => Translation::PassThrough(state),
        NativeError::Index { message, backtrace } => Translation::Raise {
            exc_type: ForeignExcType::IndexError,
            message: config.process_message(&render(message, backtrace, config)),
        },
        NativeError::Type(message) => Translation::Raise {
            exc_type: ForeignExcType::TypeError,
            message: config.process_message(&message),
        },
        NativeError::Value(message) => Translation::Raise {
            exc_type: ForeignExcType::ValueError,
            message: config.process_message(&message),
        },
        NativeError::Declared(error) => Translation::Raise {
            exc_type: error.foreign_type(),
            message: config.process_message(&error.render_message()),
        },
        NativeError::Generic { message, backtrace } => Translation::Raise {
            exc_type: ForeignExcType::RuntimeError,
            message: config.process_message(&render(message, backtrace, config)),
        },
        NativeError::ControlFlow(signal) => Translation::Signal(signal),
    }
}

/// Appends the backtrace to the message when the configuration asks for it.
fn render(message: String, backtrace: Option<String>, config: &BoundaryConfig) -> String {
    match backtrace {
        Some(trace) if config.include_backtrace => format!("{message}\n{trace}"),
        _ => message,
    }
}
