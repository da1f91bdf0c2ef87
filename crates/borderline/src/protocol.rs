//! The boundary call protocol.
//!
//! [`Boundary`] wraps one native call at a time: it installs a [`WarningBuffer`], runs the
//! body, installs the translated error if the body failed, reconciles the buffered warnings
//! with whatever error is now active, and hands the caller a result in one of three calling
//! conventions.
//!
//! ```text
//! Ready ─► InNativeBody ─┬─► Success ───────────────────────────────┬─► Returned
//!                        ├─► NativeErrorCaught ──────┐              │
//!                        ├─► ForeignErrorAlreadySet ─┴─► Translated ┘
//!                        └─► ControlSignalInFlight ──────────────────► Returned
//! ```
//!
//! `Success` also goes through `Translated` when replaying a buffered warning raised a foreign
//! error.

use std::sync::Arc;

use strum::{Display, IntoStaticStr};

use crate::{
    config::BoundaryConfig,
    error::{BoundaryError, ErrorAlreadySet},
    runtime::{ForeignRuntime, LockGuard},
    tracer::{BoundaryTracer, NoopTracer},
    translate::{CONTROL_SIGNAL_SENTINEL, ControlSignal, ForeignExcType, NativeError, Selector, Translation, translate},
    warning::WarningBuffer,
};

/// Message installed when a body reports an already-set foreign error that is not there.
const MISSING_FOREIGN_ERROR: &str = "native code reported a foreign error, but none was set";

/// States of a boundary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum CallState {
    /// No call has started, or the next one is about to.
    Ready,
    /// The native body is running with warnings buffered.
    InNativeBody,
    /// The body returned a value.
    Success,
    /// The body returned a native error that is being translated.
    NativeErrorCaught,
    /// The failure is already described by the interpreter's error slot.
    ForeignErrorAlreadySet,
    /// A control signal is crossing the boundary.
    ControlSignalInFlight,
    /// The error for the call is installed and the buffered warnings are replayed.
    Translated,
    /// The call has handed its result back.
    Returned,
}

/// How a call ended, before it is shaped into a calling convention.
#[derive(Debug)]
enum Outcome<T> {
    Value(T),
    /// The error for the call is installed in the interpreter's error slot.
    Failed,
    Signal(ControlSignal),
}

/// Wraps native calls made on behalf of the foreign runtime.
///
/// One boundary handles one call at a time; it is cheap to create one per thread. Only a
/// single call may be in flight process-wide, because the warning handler it substitutes is
/// process-wide: a second nested or concurrent call fails fast with a `RuntimeError` naming
/// which of the two it was, unless the slot already holds an error, which is then kept.
///
/// ```
/// use std::sync::Arc;
///
/// use borderline::{
///     Boundary, ForeignExcType, NativeError,
///     sim::{SimError, SimRuntime},
/// };
///
/// let runtime = Arc::new(SimRuntime::new());
/// let mut boundary = Boundary::new(runtime.clone());
///
/// let result = boundary.call_sentinel(|| Err::<i32, _>(NativeError::index("index 5 out of bounds")));
/// assert_eq!(result, Ok(None));
/// assert_eq!(
///     runtime.current_error(),
///     Some(SimError::exception(ForeignExcType::IndexError, "index 5 out of bounds"))
/// );
/// ```
#[derive(Debug)]
pub struct Boundary<Tr: BoundaryTracer = NoopTracer> {
    runtime: Arc<dyn ForeignRuntime>,
    config: BoundaryConfig,
    tracer: Tr,
    state: CallState,
}

impl Boundary<NoopTracer> {
    #[must_use]
    pub fn new(runtime: Arc<dyn ForeignRuntime>) -> Self {
        Self::with_tracer(runtime, NoopTracer)
    }
}

impl<Tr: BoundaryTracer> Boundary<Tr> {
    #[must_use]
    pub fn with_tracer(runtime: Arc<dyn ForeignRuntime>, tracer: Tr) -> Self {
        Self {
            runtime,
            config: BoundaryConfig::default(),
            tracer,
            state: CallState::Ready,
        }
    }

    /// Replaces the message rendering configuration.
    #[must_use]
    pub fn with_config(mut self, config: BoundaryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ForeignRuntime> {
        &self.runtime
    }

    #[must_use]
    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    /// State the last call ended in; `Ready` before the first call.
    ///
    /// A call whose body panicked stops in `InNativeBody`: the unwind leaves the state machine
    /// where the panic found it.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Returns true when the interpreter's error slot is populated.
    ///
    /// Native bodies that call back into the interpreter use this to turn a failed callback
    /// into [`NativeError::already_set`].
    #[must_use]
    pub fn foreign_error_pending(&self) -> bool {
        let lock = LockGuard::acquire(&*self.runtime);
        self.runtime.error_occurred(&lock)
    }

    /// "Return failure sentinel" convention: `Ok(None)` when the call failed.
    ///
    /// The error is installed in the interpreter's error slot. Control signals come back
    /// unmodified as `Err`.
    pub fn call_sentinel<T>(
        &mut self,
        body: impl FnOnce() -> Result<T, NativeError>,
    ) -> Result<Option<T>, ControlSignal> {
        match self.run(body) {
            Outcome::Value(value) => Ok(Some(value)),
            Outcome::Failed => Ok(None),
            Outcome::Signal(signal) => Err(signal),
        }
    }

    /// "Return specific failure value" convention: `Ok(failure)` when the call failed.
    pub fn call_or<T>(&mut self, failure: T, body: impl FnOnce() -> Result<T, NativeError>) -> Result<T, ControlSignal> {
        match self.run(body) {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed => Ok(failure),
            Outcome::Signal(signal) => Err(signal),
        }
    }

    /// "Rethrow as boundary error" convention.
    ///
    /// A failed call returns `Err(BoundaryError::ErrorAlreadySet)` with the error installed in
    /// the interpreter's slot; a control signal returns `Err(BoundaryError::Control)`.
    pub fn call_rethrow<T>(&mut self, body: impl FnOnce() -> Result<T, NativeError>) -> Result<T, BoundaryError> {
        match self.run(body) {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed => Err(BoundaryError::ErrorAlreadySet),
            Outcome::Signal(signal) => Err(BoundaryError::Control(signal)),
        }
    }

    fn run<T>(&mut self, body: impl FnOnce() -> Result<T, NativeError>) -> Outcome<T> {
        self.state = CallState::Ready;
        let buffer = match WarningBuffer::install() {
            Ok(buffer) => buffer,
            Err(refused) => {
                let message = refused.to_string();
                tracing::warn!("{message}");
                let lock = LockGuard::acquire(&*self.runtime);
                // a callback that failed inside the outer call already set the error to report
                if !self.runtime.error_occurred(&lock) {
                    self.runtime.set_error(&lock, ForeignExcType::RuntimeError, &message);
                }
                drop(lock);
                self.transition(CallState::Translated);
                self.transition(CallState::Returned);
                return Outcome::Failed;
            }
        };

        self.transition(CallState::InNativeBody);
        match body() {
            Ok(value) => {
                self.transition(CallState::Success);
                match buffer.release(&*self.runtime, &mut self.tracer) {
                    Ok(()) => {
                        self.transition(CallState::Returned);
                        Outcome::Value(value)
                    }
                    Err(ErrorAlreadySet) => {
                        self.transition(CallState::Translated);
                        self.transition(CallState::Returned);
                        Outcome::Failed
                    }
                }
            }
            Err(error) => self.fail(error, buffer),
        }
    }

    /// Installs the error for a failed body and reconciles the buffered warnings with it.
    fn fail<T>(&mut self, error: NativeError, buffer: WarningBuffer) -> Outcome<T> {
        let selector = error.selector();
        if selector != Selector::ControlFlow && self.foreign_error_pending() {
            // an error already in the slot wins; the native payload is dropped
            self.transition(CallState::ForeignErrorAlreadySet);
            if selector != Selector::AlreadyForeign {
                self.tracer.on_discarded(selector);
            }
            drop(error);
        } else {
            match translate(error, &self.config) {
                Translation::PassThrough(state) => {
                    self.transition(CallState::ForeignErrorAlreadySet);
                    match state {
                        Some(state) if state.is_populated() => state.restore(),
                        _ => {
                            tracing::warn!("{MISSING_FOREIGN_ERROR}");
                            self.set_error(ForeignExcType::RuntimeError, MISSING_FOREIGN_ERROR);
                        }
                    }
                }
                Translation::Raise { exc_type, message } => {
                    self.transition(CallState::NativeErrorCaught);
                    self.set_error(exc_type, &message);
                    self.tracer.on_translated(selector, exc_type, &message);
                }
                Translation::Signal(signal) => return self.pass_signal(signal, buffer),
            }
        }

        self.transition(CallState::Translated);
        let released = buffer.release(&*self.runtime, &mut self.tracer);
        debug_assert!(released.is_ok(), "warnings replay natively while an error is set");
        self.transition(CallState::Returned);
        Outcome::Failed
    }

    /// Lets a control signal cross, keeping the error slot as it was found.
    fn pass_signal<T>(&mut self, signal: ControlSignal, buffer: WarningBuffer) -> Outcome<T> {
        self.transition(CallState::ControlSignalInFlight);
        // the sentinel makes the buffer see an active error and replay natively
        let sentinel = {
            let lock = LockGuard::acquire(&*self.runtime);
            if self.runtime.error_occurred(&lock) {
                false
            } else {
                self.runtime
                    .set_error(&lock, ForeignExcType::RuntimeError, CONTROL_SIGNAL_SENTINEL);
                true
            }
        };
        let released = buffer.release(&*self.runtime, &mut self.tracer);
        debug_assert!(released.is_ok(), "warnings replay natively while a signal is in flight");
        if sentinel {
            let lock = LockGuard::acquire(&*self.runtime);
            self.runtime.clear_error(&lock);
        }
        self.transition(CallState::Returned);
        Outcome::Signal(signal)
    }

    fn set_error(&self, exc_type: ForeignExcType, message: &str) {
        let lock = LockGuard::acquire(&*self.runtime);
        self.runtime.set_error(&lock, exc_type, message);
    }

    fn transition(&mut self, to: CallState) {
        let from = std::mem::replace(&mut self.state, to);
        self.tracer.on_transition(from, to);
    }
}
