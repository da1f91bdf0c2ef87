//! Boundary call tracing.
//!
//! [`BoundaryTracer`] defines hook points at the key events of a boundary call: state
//! transitions, translations, discarded native payloads, and warning replays. A [`Boundary`]
//! carries its tracer as a type parameter, so with [`NoopTracer`] every hook compiles away.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`LogTracer`] | Structured `tracing` events at debug level |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem |
//!
//! [`Boundary`]: crate::Boundary

use crate::{
    protocol::CallState,
    translate::{ForeignExcType, Selector},
    warning::WarningCategory,
};

/// Where a buffered warning was replayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ReplayTarget {
    /// The interpreter's warning channel.
    Foreign,
    /// The restored native warning handler.
    Native,
}

/// Trace event emitted during a boundary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The call state machine moved between states.
    Transition { from: CallState, to: CallState },
    /// A native error was translated and installed.
    Translated {
        selector: Selector,
        exc_type: ForeignExcType,
        message: String,
    },
    /// A native error was dropped because the interpreter already had an error set.
    Discarded { selector: Selector },
    /// A buffered warning was replayed.
    WarningReplayed {
        category: WarningCategory,
        target: ReplayTarget,
    },
    /// A replayed warning turned into a foreign error.
    WarningEscalated { category: WarningCategory },
}

/// Trait for boundary call tracing.
///
/// All methods have default no-op implementations, so implementations only override the
/// hooks they care about.
pub trait BoundaryTracer: std::fmt::Debug {
    #[inline(always)]
    fn on_transition(&mut self, _from: CallState, _to: CallState) {}

    #[inline(always)]
    fn on_translated(&mut self, _selector: Selector, _exc_type: ForeignExcType, _message: &str) {}

    #[inline(always)]
    fn on_discarded(&mut self, _selector: Selector) {}

    #[inline(always)]
    fn on_warning_replay(&mut self, _category: WarningCategory, _target: ReplayTarget) {}

    #[inline(always)]
    fn on_warning_escalated(&mut self, _category: WarningCategory) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl BoundaryTracer for NoopTracer {}

/// Tracer that forwards every hook to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl BoundaryTracer for LogTracer {
    fn on_transition(&mut self, from: CallState, to: CallState) {
        tracing::debug!(%from, %to, "boundary transition");
    }

    fn on_translated(&mut self, selector: Selector, exc_type: ForeignExcType, message: &str) {
        tracing::debug!(%selector, %exc_type, msg = message, "native error translated");
    }

    fn on_discarded(&mut self, selector: Selector) {
        tracing::debug!(%selector, "native error discarded, foreign error already set");
    }

    fn on_warning_replay(&mut self, category: WarningCategory, target: ReplayTarget) {
        tracing::debug!(%category, %target, "buffered warning replayed");
    }

    fn on_warning_escalated(&mut self, category: WarningCategory) {
        tracing::debug!(%category, "warning escalated to foreign error");
    }
}

/// Tracer that records every event in order.
///
/// Allocates per event; meant for tests and for recording short sequences of calls.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Only the state transitions, as `(from, to)` pairs.
    #[must_use]
    pub fn transitions(&self) -> Vec<(CallState, CallState)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Transition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl BoundaryTracer for RecordingTracer {
    fn on_transition(&mut self, from: CallState, to: CallState) {
        self.events.push(TraceEvent::Transition { from, to });
    }

    fn on_translated(&mut self, selector: Selector, exc_type: ForeignExcType, message: &str) {
        self.events.push(TraceEvent::Translated {
            selector,
            exc_type,
            message: message.to_owned(),
        });
    }

    fn on_discarded(&mut self, selector: Selector) {
        self.events.push(TraceEvent::Discarded { selector });
    }

    fn on_warning_replay(&mut self, category: WarningCategory, target: ReplayTarget) {
        self.events.push(TraceEvent::WarningReplayed { category, target });
    }

    fn on_warning_escalated(&mut self, category: WarningCategory) {
        self.events.push(TraceEvent::WarningEscalated { category });
    }
}
