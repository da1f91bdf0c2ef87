//! Native warnings and the scoped buffer that defers them across a boundary call.
//!
//! Native code reports warnings through the process-wide handler ([`warn`], [`warn_at`]).
//! While a [`WarningBuffer`] is installed that handler is swapped for one that only queues, so
//! nothing reaches the interpreter mid-call. On the way out the queue is replayed once:
//!
//! - if no error is active, each warning goes to the interpreter's warning channel, which may
//!   escalate it into an error;
//! - if an error is already active, the warnings are re-emitted as native warnings instead, since
//!   the interpreter cannot hold two errors at once.
//!
//! Whether a warning escalates can only be known by replaying it, which is why replay waits
//! until every other outcome of the call is settled.

use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock},
    thread::{self, ThreadId},
};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{BufferInstallError, ErrorAlreadySet},
    runtime::{ForeignRuntime, LockGuard},
    tracer::{BoundaryTracer, ReplayTarget},
};

/// Warning categories understood by both sides of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum WarningCategory {
    /// `UserWarning`, the default category.
    User,
    /// `DeprecationWarning`, hidden by the interpreter's default filters.
    Deprecated,
    /// `RuntimeWarning`, for dubious runtime behavior.
    Runtime,
    /// `FutureWarning`, for semantics that will change.
    Future,
}

impl WarningCategory {
    /// Name of the matching warning class in the interpreter.
    #[must_use]
    pub fn foreign_name(self) -> &'static str {
        match self {
            Self::User => "UserWarning",
            Self::Deprecated => "DeprecationWarning",
            Self::Runtime => "RuntimeWarning",
            Self::Future => "FutureWarning",
        }
    }
}

/// Where in native code a warning was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Function the warning was emitted from.
    pub function: String,
    /// Source file of that function.
    pub file: String,
    /// One-based line number.
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.function, self.file, self.line)
    }
}

/// A structured native warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Category the interpreter files the warning under.
    pub category: WarningCategory,
    /// Text shown to the user.
    pub message: String,
    /// Set by [`warn_at`]; plain [`warn`] leaves it empty.
    pub location: Option<SourceLocation>,
}

impl Warning {
    #[must_use]
    pub fn new(category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            location: None,
        }
    }

    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category.foreign_name(), self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

/// Receives native warnings.
pub trait WarningHandler: Send + Sync + fmt::Debug {
    /// Handles one warning; may be called from any thread.
    fn process(&self, warning: Warning);
}

/// Default handler: logs each warning through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl WarningHandler for LogHandler {
    fn process(&self, warning: Warning) {
        match &warning.location {
            Some(location) => tracing::warn!(
                category = %warning.category,
                location = %location,
                "{}",
                warning.message
            ),
            None => tracing::warn!(category = %warning.category, "{}", warning.message),
        }
    }
}

/// Handler that keeps every warning it receives, in order.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    warnings: Mutex<Vec<Warning>>,
}

impl CollectingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the warnings received so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().expect("collected warnings mutex poisoned").clone()
    }

    /// Removes and returns the warnings received so far.
    pub fn take(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.warnings.lock().expect("collected warnings mutex poisoned"))
    }
}

impl WarningHandler for CollectingHandler {
    fn process(&self, warning: Warning) {
        self.warnings
            .lock()
            .expect("collected warnings mutex poisoned")
            .push(warning);
    }
}

/// Process-wide handler state.
#[derive(Debug)]
struct HandlerSlot {
    handler: Arc<dyn WarningHandler>,
    /// Thread whose `WarningBuffer` owns the slot, if any.
    buffer_owner: Option<ThreadId>,
}

static HANDLER_SLOT: OnceLock<Mutex<HandlerSlot>> = OnceLock::new();

fn handler_slot() -> &'static Mutex<HandlerSlot> {
    HANDLER_SLOT.get_or_init(|| {
        Mutex::new(HandlerSlot {
            handler: Arc::new(LogHandler),
            buffer_owner: None,
        })
    })
}

/// Returns the currently active warning handler.
#[must_use]
pub fn warning_handler() -> Arc<dyn WarningHandler> {
    Arc::clone(&handler_slot().lock().expect("warning handler mutex poisoned").handler)
}

/// Installs `handler` as the process-wide warning handler and returns the previous one.
///
/// While a [`WarningBuffer`] is installed, the replaced handler is the buffer's capturing
/// handler; the buffer will still restore the handler it saved when it is released.
pub fn set_warning_handler(handler: Arc<dyn WarningHandler>) -> Arc<dyn WarningHandler> {
    let mut slot = handler_slot().lock().expect("warning handler mutex poisoned");
    std::mem::replace(&mut slot.handler, handler)
}

/// Emits a native warning to the active handler.
pub fn warn(category: WarningCategory, message: impl Into<String>) {
    emit(Warning::new(category, message));
}

/// Emits a native warning with the location it was raised from.
pub fn warn_at(category: WarningCategory, message: impl Into<String>, location: SourceLocation) {
    emit(Warning::new(category, message).at(location));
}

/// Sends a fully built warning to the active handler.
pub fn emit(warning: Warning) {
    // the handler runs outside the slot lock so it may emit warnings itself
    let handler = warning_handler();
    handler.process(warning);
}

/// Handler installed by a `WarningBuffer`; queues instead of emitting.
#[derive(Debug, Default)]
struct BufferingHandler {
    queue: Mutex<SmallVec<[Warning; 2]>>,
}

impl BufferingHandler {
    fn take(&self) -> SmallVec<[Warning; 2]> {
        std::mem::take(&mut *self.queue.lock().expect("warning buffer mutex poisoned"))
    }
}

impl WarningHandler for BufferingHandler {
    fn process(&self, warning: Warning) {
        self.queue.lock().expect("warning buffer mutex poisoned").push(warning);
    }
}

/// Scoped interceptor that queues native warnings for the duration of a boundary call.
///
/// Only one buffer may be installed at a time, process-wide. Call [`release`](Self::release) on
/// the way out; a buffer dropped without being released restores the previous handler and
/// re-emits its warnings natively, so the handler is restored on every exit path.
///
/// The handler slot is global, so warnings emitted from any thread while a buffer is installed
/// are queued into it and replayed with the owning call.
#[must_use = "dropping the buffer immediately re-emits everything natively"]
pub struct WarningBuffer {
    capture: Arc<BufferingHandler>,
    previous: Arc<dyn WarningHandler>,
    installed: bool,
    drained: bool,
}

impl WarningBuffer {
    /// Saves the active handler and installs a capturing one.
    ///
    /// Fails if another buffer is still installed, telling apart an install nested on the
    /// owning thread from one racing in from another thread.
    pub fn install() -> Result<Self, BufferInstallError> {
        let capture = Arc::new(BufferingHandler::default());
        let me = thread::current().id();
        let mut slot = handler_slot().lock().expect("warning handler mutex poisoned");
        match slot.buffer_owner {
            Some(owner) if owner == me => return Err(BufferInstallError::Nested),
            Some(_) => return Err(BufferInstallError::Concurrent),
            None => {}
        }
        let previous = std::mem::replace(&mut slot.handler, Arc::clone(&capture) as Arc<dyn WarningHandler>);
        slot.buffer_owner = Some(me);
        Ok(Self {
            capture,
            previous,
            installed: true,
            drained: false,
        })
    }

    /// Number of warnings queued so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capture.queue.lock().expect("warning buffer mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restores the handler and replays the queue, choosing the path from the error slot.
    ///
    /// Returns `Err(ErrorAlreadySet)` when a replayed warning escalated into a foreign error;
    /// that error is left in the slot and the warnings after it are re-emitted natively.
    pub fn release(
        mut self,
        runtime: &dyn ForeignRuntime,
        tracer: &mut impl BoundaryTracer,
    ) -> Result<(), ErrorAlreadySet> {
        self.uninstall();
        self.drained = true;
        let warnings = self.capture.take();
        if warnings.is_empty() {
            return Ok(());
        }

        let lock = LockGuard::acquire(runtime);
        if runtime.error_occurred(&lock) {
            drop(lock);
            self.replay_native(warnings, tracer);
            return Ok(());
        }

        let mut pending = warnings.into_iter();
        let mut result = Ok(());
        for warning in pending.by_ref() {
            tracer.on_warning_replay(warning.category, ReplayTarget::Foreign);
            if let Err(escalated) = runtime.warn(&lock, warning.category, &warning.message) {
                tracer.on_warning_escalated(warning.category);
                result = Err(escalated);
                break;
            }
        }
        drop(lock);

        let rest: SmallVec<[Warning; 2]> = pending.collect();
        if !rest.is_empty() {
            self.replay_native(rest, tracer);
        }
        result
    }

    /// Restores the handler and re-emits the queue natively, never touching the interpreter.
    pub fn drain_to_native(mut self, tracer: &mut impl BoundaryTracer) {
        self.uninstall();
        self.drained = true;
        let warnings = self.capture.take();
        self.replay_native(warnings, tracer);
    }

    fn uninstall(&mut self) {
        if !self.installed {
            return;
        }
        let mut slot = handler_slot().lock().expect("warning handler mutex poisoned");
        slot.handler = Arc::clone(&self.previous);
        slot.buffer_owner = None;
        self.installed = false;
    }

    fn replay_native(&self, warnings: SmallVec<[Warning; 2]>, tracer: &mut impl BoundaryTracer) {
        for warning in warnings {
            tracer.on_warning_replay(warning.category, ReplayTarget::Native);
            self.previous.process(warning);
        }
    }
}

impl Drop for WarningBuffer {
    fn drop(&mut self) {
        self.uninstall();
        if self.drained {
            return;
        }
        let warnings = self.capture.take();
        if warnings.is_empty() {
            return;
        }
        if thread::panicking() {
            tracing::debug!(count = warnings.len(), "re-emitting buffered warnings during unwind");
        }
        for warning in warnings {
            self.previous.process(warning);
        }
    }
}

impl fmt::Debug for WarningBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarningBuffer")
            .field("queued", &self.len())
            .field("installed", &self.installed)
            .field("previous", &self.previous)
            .finish()
    }
}
