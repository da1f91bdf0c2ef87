//! Owned snapshots of the interpreter's error slot.
//!
//! A [`ForeignErrorState`] is how a foreign error survives outside the interpreter: it is
//! captured with [`persist`](ForeignErrorState::persist), may be moved or cloned across
//! threads, and is put back with [`restore`](ForeignErrorState::restore) before control returns
//! to the interpreter. Every reference-count change happens under the runtime's global lock.

use std::{fmt, sync::Arc};

use crate::runtime::{ForeignRuntime, LockGuard, ObjectHandle, OwnedTriple};

/// Owned copy of an interpreter error triple (type, value, traceback).
///
/// Each set handle is one reference owned by this instance. The state is considered populated
/// once its type handle is set; [`persist`](Self::persist) never overwrites a populated state.
pub struct ForeignErrorState {
    runtime: Arc<dyn ForeignRuntime>,
    triple: OwnedTriple,
}

impl ForeignErrorState {
    /// Creates an empty state bound to `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ForeignRuntime>) -> Self {
        Self {
            runtime,
            triple: OwnedTriple::default(),
        }
    }

    /// Creates a state and immediately persists the runtime's current error into it.
    ///
    /// The error slot is empty afterwards. If no error was set, the state is empty.
    #[must_use]
    pub fn capture(runtime: Arc<dyn ForeignRuntime>) -> Self {
        let mut state = Self::new(runtime);
        state.persist();
        state
    }

    /// Returns true when no handle is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triple.is_empty()
    }

    /// Returns true when a captured error is held.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.triple.exc_type.is_some()
    }

    /// Handles currently owned by this state, in type, value, traceback order.
    ///
    /// A view for inspection: the state keeps ownership, and a bare handle cannot be installed.
    #[must_use]
    pub fn handles(&self) -> [Option<ObjectHandle>; 3] {
        self.triple.as_array()
    }

    /// The runtime this state belongs to.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ForeignRuntime> {
        &self.runtime
    }

    /// Fetches the interpreter's current error into this state.
    ///
    /// No-op when already populated: the first captured error wins. Fetching clears the
    /// interpreter's error slot.
    pub fn persist(&mut self) {
        if self.is_populated() {
            return;
        }
        let lock = LockGuard::acquire(&*self.runtime);
        // a stray value or traceback without a type would be overwritten by the fetch
        for handle in self.triple.handles() {
            self.runtime.decref(&lock, handle);
        }
        self.triple = self.runtime.fetch_error(&lock);
    }

    /// Installs this state as the interpreter's active error.
    ///
    /// The install steals references, so each held handle is incremented first; this instance
    /// keeps its own references and may be restored again.
    pub fn restore(&self) {
        if !self.is_populated() {
            return;
        }
        let lock = LockGuard::acquire(&*self.runtime);
        for handle in self.triple.handles() {
            self.runtime.incref(&lock, handle);
        }
        // the install steals exactly the references added above
        let stolen = self.triple.share_incremented();
        self.runtime.install_error(&lock, stolen);
    }

    /// Moves the held references into a new state, leaving this one empty.
    ///
    /// No reference count changes, so no lock is taken.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            triple: std::mem::take(&mut self.triple),
        }
    }

    fn release(&mut self) {
        let triple = std::mem::take(&mut self.triple);
        if triple.is_empty() {
            return;
        }
        let lock = LockGuard::acquire(&*self.runtime);
        for handle in triple.handles() {
            self.runtime.decref(&lock, handle);
        }
    }
}

impl Clone for ForeignErrorState {
    fn clone(&self) -> Self {
        if !self.is_empty() {
            let lock = LockGuard::acquire(&*self.runtime);
            for handle in self.triple.handles() {
                self.runtime.incref(&lock, handle);
            }
        }
        Self {
            runtime: Arc::clone(&self.runtime),
            triple: self.triple.share_incremented(),
        }
    }
}

impl Drop for ForeignErrorState {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ForeignErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn addr(handle: Option<ObjectHandle>) -> Option<usize> {
            handle.map(ObjectHandle::addr)
        }
        f.debug_struct("ForeignErrorState")
            .field("exc_type", &addr(self.triple.exc_type))
            .field("value", &addr(self.triple.value))
            .field("traceback", &addr(self.triple.traceback))
            .finish_non_exhaustive()
    }
}

/// Two states are equal when they hold the same handles.
impl PartialEq for ForeignErrorState {
    fn eq(&self, other: &Self) -> bool {
        self.triple == other.triple
    }
}

impl Eq for ForeignErrorState {}
