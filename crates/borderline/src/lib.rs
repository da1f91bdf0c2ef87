#![doc = include_str!("../../../README.md")]

mod config;
mod error;
mod foreign_error;
mod protocol;
pub mod runtime;
pub mod sim;
pub mod tracer;
mod translate;
mod warning;

pub use crate::{
    config::{BoundaryConfig, MessageSubstitution},
    error::{BoundaryError, BufferInstallError, ConfigError, ErrorAlreadySet},
    foreign_error::ForeignErrorState,
    protocol::{Boundary, CallState},
    runtime::{ForeignRuntime, LockGuard, LockToken, ObjectHandle, OwnedTriple},
    tracer::{BoundaryTracer, LogTracer, NoopTracer, RecordingTracer, ReplayTarget, TraceEvent},
    translate::{
        CONTROL_SIGNAL_SENTINEL, ControlSignal, ForeignExcType, NativeError, Selector, TranslatableError, Translation,
        translate,
    },
    warning::{
        CollectingHandler, LogHandler, SourceLocation, Warning, WarningBuffer, WarningCategory, WarningHandler, emit,
        set_warning_handler, warn, warn_at, warning_handler,
    },
};
