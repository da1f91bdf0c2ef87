//! Capability surface consumed from the foreign runtime.
//!
//! The interpreter's object model and reference counting live outside this crate. Everything
//! the boundary needs from them is expressed by [`ForeignRuntime`]: fetch/install/clear the
//! error slot, duplicate and release references, raise errors and warnings, and take the
//! global lock.
//!
//! Operations that touch reference counts take a [`LockGuard`] as proof that the global lock
//! is held, the same way pyo3 threads a `Python<'py>` token through GIL-bound APIs.

use std::{fmt, marker::PhantomData, num::NonZeroUsize};

use crate::{error::ErrorAlreadySet, translate::ForeignExcType, warning::WarningCategory};

/// Opaque, non-null handle to a foreign object.
///
/// A handle on its own says nothing about ownership. Handles only ever travel inside
/// [`OwnedTriple`] or [`ForeignErrorState`](crate::ForeignErrorState), both of which own one
/// reference per handle they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(NonZeroUsize);

impl ObjectHandle {
    /// Wraps a raw address, returning `None` for null.
    #[must_use]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    /// Returns the raw address of the handle.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.get()
    }
}

/// An error triple whose non-null handles are each one owned reference.
///
/// Produced by [`ForeignRuntime::fetch_error`] and consumed by [`ForeignRuntime::install_error`],
/// which steals the references. Dropping an `OwnedTriple` without handing it back to the runtime
/// leaks; callers keep it inside a `ForeignErrorState` instead.
///
/// The triple is neither `Clone` nor `Copy`: a second copy would own the same references twice.
///
/// ```compile_fail
/// fn duplicate(triple: &borderline::OwnedTriple) -> borderline::OwnedTriple {
///     *triple
/// }
/// ```
#[derive(Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct OwnedTriple {
    /// Exception class.
    pub(crate) exc_type: Option<ObjectHandle>,
    /// Exception instance.
    pub(crate) value: Option<ObjectHandle>,
    /// Traceback object, if the error was raised by interpreter code.
    pub(crate) traceback: Option<ObjectHandle>,
}

impl OwnedTriple {
    /// Takes ownership of one reference per non-null handle.
    ///
    /// Runtime implementations call this from [`ForeignRuntime::fetch_error`].
    ///
    /// # Safety
    ///
    /// Each set handle must be a live object, and the caller must give up one reference to it.
    /// No other `OwnedTriple` may claim the same references.
    pub unsafe fn from_raw(
        exc_type: Option<ObjectHandle>,
        value: Option<ObjectHandle>,
        traceback: Option<ObjectHandle>,
    ) -> Self {
        Self {
            exc_type,
            value,
            traceback,
        }
    }

    /// Gives up the ownership tag, returning the handles in type, value, traceback order.
    ///
    /// The references are now the caller's to release or hand to the runtime, as
    /// [`ForeignRuntime::install_error`] implementations do.
    #[must_use]
    pub fn into_raw(self) -> [Option<ObjectHandle>; 3] {
        [self.exc_type, self.value, self.traceback]
    }

    /// Returns true when no handle is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exc_type.is_none() && self.value.is_none() && self.traceback.is_none()
    }

    /// The handles in type, value, traceback order, for inspection only.
    #[must_use]
    pub fn as_array(&self) -> [Option<ObjectHandle>; 3] {
        [self.exc_type, self.value, self.traceback]
    }

    /// Iterates over the set handles in type, value, traceback order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + use<> {
        self.as_array().into_iter().flatten()
    }

    /// A second triple over the same handles.
    ///
    /// Only sound once the caller has added one reference per handle, which the new triple
    /// then owns.
    pub(crate) fn share_incremented(&self) -> Self {
        Self {
            exc_type: self.exc_type,
            value: self.value,
            traceback: self.traceback,
        }
    }
}

/// Token returned by [`ForeignRuntime::acquire_lock`], handed back on release.
///
/// CPython's `PyGILState_Ensure` returns state that must be passed to the matching release;
/// runtimes without such state can ignore the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(
    /// Runtime-defined lock state.
    pub u64,
);

/// Capability surface of the embedded interpreter.
///
/// Implementations must be callable from any thread. Methods taking a [`LockGuard`] may only be
/// called while that guard is alive; the guard type makes this hard to get wrong. This crate
/// never acquires the lock while already holding it.
pub trait ForeignRuntime: Send + Sync + fmt::Debug {
    /// Blocks until the global lock is held by the calling thread.
    fn acquire_lock(&self) -> LockToken;

    /// Releases a lock previously returned by [`Self::acquire_lock`].
    fn release_lock(&self, token: LockToken);

    /// Takes the current error triple out of the error slot, leaving the slot empty.
    ///
    /// Ownership of every returned reference passes to the caller.
    fn fetch_error(&self, lock: &LockGuard<'_>) -> OwnedTriple;

    /// Installs `triple` as the active error, stealing its references.
    ///
    /// Any error already in the slot is released.
    fn install_error(&self, lock: &LockGuard<'_>, triple: OwnedTriple);

    /// Clears the error slot, releasing whatever it held.
    fn clear_error(&self, lock: &LockGuard<'_>);

    /// Returns true when the error slot is populated.
    fn error_occurred(&self, lock: &LockGuard<'_>) -> bool;

    /// Adds one reference to `handle`.
    fn incref(&self, lock: &LockGuard<'_>, handle: ObjectHandle);

    /// Releases one reference to `handle`.
    fn decref(&self, lock: &LockGuard<'_>, handle: ObjectHandle);

    /// Creates a fresh error of `exc_type` with `message` and installs it as the active error.
    fn set_error(&self, lock: &LockGuard<'_>, exc_type: ForeignExcType, message: &str);

    /// Issues a warning on the interpreter's warning channel.
    ///
    /// Returns `Err(ErrorAlreadySet)` when the interpreter escalated the warning into an error,
    /// which is then the active error.
    fn warn(&self, lock: &LockGuard<'_>, category: WarningCategory, message: &str) -> Result<(), ErrorAlreadySet>;
}

/// RAII proof that the global lock of a [`ForeignRuntime`] is held.
///
/// Acquired with [`LockGuard::acquire`]; the lock is released when the guard drops, including
/// on early return and unwind. The guard cannot leave the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'rt> {
    runtime: &'rt dyn ForeignRuntime,
    token: LockToken,
    _not_send: PhantomData<*const ()>,
}

impl<'rt> LockGuard<'rt> {
    /// Acquires the global lock of `runtime`.
    pub fn acquire(runtime: &'rt dyn ForeignRuntime) -> Self {
        let token = runtime.acquire_lock();
        Self {
            runtime,
            token,
            _not_send: PhantomData,
        }
    }

    /// The runtime this guard locks.
    #[must_use]
    pub fn runtime(&self) -> &'rt dyn ForeignRuntime {
        self.runtime
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.runtime.release_lock(self.token);
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("token", &self.token).finish_non_exhaustive()
    }
}
