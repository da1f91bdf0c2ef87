//! In-process reference runtime.
//!
//! [`SimRuntime`] implements [`ForeignRuntime`] with an explicit reference-count ledger, a
//! single error slot, a warning channel with per-category escalation, and a global lock that
//! refuses recursive acquisition. It evaluates no code; it exists so the boundary's
//! reference-count and locking discipline can be checked without embedding an interpreter.
//!
//! Misuse is a bug in the caller and panics: touching a released object, releasing the lock
//! from the wrong thread, or taking the lock twice on one thread.

use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

use crate::{
    error::ErrorAlreadySet,
    runtime::{ForeignRuntime, LockGuard, LockToken, ObjectHandle, OwnedTriple},
    translate::ForeignExcType,
    warning::WarningCategory,
};

/// Class of a simulated exception: an ordinary error or an escalated warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimClass {
    /// An ordinary error raised as the given type.
    Exception(ForeignExcType),
    /// A warning the channel escalated into an error.
    Warning(WarningCategory),
}

/// The error currently held by a [`SimRuntime`], as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError {
    /// Class of the error instance.
    pub class: SimClass,
    /// Message the error was created with; empty when the slot holds a bare class.
    pub message: String,
}

impl SimError {
    #[must_use]
    pub fn exception(exc_type: ForeignExcType, message: impl Into<String>) -> Self {
        Self {
            class: SimClass::Exception(exc_type),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            class: SimClass::Warning(category),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
enum ObjectKind {
    Class(SimClass),
    Instance { class: SimClass, message: String },
    Traceback,
}

#[derive(Debug)]
struct SimObject {
    refcount: usize,
    kind: ObjectKind,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    acquisitions: u64,
}

#[derive(Debug)]
struct Heap {
    objects: HashMap<usize, SimObject>,
    next_addr: usize,
    error: OwnedTriple,
    warning_calls: Vec<(WarningCategory, String)>,
    escalate: HashSet<WarningCategory>,
}

impl Heap {
    fn allocate(&mut self, kind: ObjectKind) -> ObjectHandle {
        let addr = self.next_addr;
        self.next_addr += 0x10;
        self.objects.insert(addr, SimObject { refcount: 1, kind });
        ObjectHandle::from_addr(addr).expect("simulated addresses start above zero")
    }

    fn incref(&mut self, handle: ObjectHandle) {
        match self.objects.get_mut(&handle.addr()) {
            Some(object) => object.refcount += 1,
            None => panic!("incref of released object {:#x}", handle.addr()),
        }
    }

    fn decref(&mut self, handle: ObjectHandle) {
        let addr = handle.addr();
        let Some(object) = self.objects.get_mut(&addr) else {
            panic!("decref of released object {addr:#x}");
        };
        object.refcount -= 1;
        if object.refcount == 0 {
            self.objects.remove(&addr);
        }
    }

    fn install(&mut self, triple: OwnedTriple) {
        let old = std::mem::replace(&mut self.error, triple);
        for handle in old.handles() {
            self.decref(handle);
        }
    }

    fn new_error(&mut self, class: SimClass, message: &str, with_traceback: bool) -> OwnedTriple {
        OwnedTriple {
            exc_type: Some(self.allocate(ObjectKind::Class(class))),
            value: Some(self.allocate(ObjectKind::Instance {
                class,
                message: message.to_owned(),
            })),
            traceback: with_traceback.then(|| self.allocate(ObjectKind::Traceback)),
        }
    }
}

/// Reference runtime with observable reference counts.
#[derive(Debug)]
pub struct SimRuntime {
    lock: Mutex<LockState>,
    lock_released: Condvar,
    heap: Mutex<Heap>,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(LockState::default()),
            lock_released: Condvar::new(),
            heap: Mutex::new(Heap {
                objects: HashMap::new(),
                next_addr: 0x1000,
                error: OwnedTriple::default(),
                warning_calls: Vec::new(),
                escalate: HashSet::new(),
            }),
        }
    }

    /// Raises an error the way interpreter code would: type, value and traceback all set.
    pub fn raise(&self, exc_type: ForeignExcType, message: &str) {
        let _lock = LockGuard::acquire(self);
        let mut heap = self.heap();
        let triple = heap.new_error(SimClass::Exception(exc_type), message, true);
        heap.install(triple);
    }

    /// Makes the warning channel raise warnings of `category` as errors.
    pub fn escalate(&self, category: WarningCategory) {
        self.heap().escalate.insert(category);
    }

    /// The error in the slot, if any.
    #[must_use]
    pub fn current_error(&self) -> Option<SimError> {
        let heap = self.heap();
        let describe = |handle: Option<ObjectHandle>| {
            handle.and_then(|h| heap.objects.get(&h.addr())).map(|object| &object.kind)
        };
        match (describe(heap.error.exc_type), describe(heap.error.value)) {
            (_, Some(ObjectKind::Instance { class, message })) => Some(SimError {
                class: *class,
                message: message.clone(),
            }),
            (Some(ObjectKind::Class(class)), _) => Some(SimError {
                class: *class,
                message: String::new(),
            }),
            _ => None,
        }
    }

    /// Handles held by the error slot, in type, value, traceback order.
    #[must_use]
    pub fn pending_handles(&self) -> [Option<ObjectHandle>; 3] {
        self.heap().error.as_array()
    }

    /// Reference count of `handle`; zero once the object is released.
    #[must_use]
    pub fn refcount(&self, handle: ObjectHandle) -> usize {
        self.heap().objects.get(&handle.addr()).map_or(0, |object| object.refcount)
    }

    /// Number of objects still alive.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap().objects.len()
    }

    /// Every call made to the warning channel, in order, including escalated ones.
    #[must_use]
    pub fn warning_calls(&self) -> Vec<(WarningCategory, String)> {
        self.heap().warning_calls.clone()
    }

    /// How many times the global lock has been acquired.
    #[must_use]
    pub fn lock_acquisitions(&self) -> u64 {
        self.lock.lock().expect("sim lock mutex poisoned").acquisitions
    }

    /// Returns true while any thread holds the global lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.lock().expect("sim lock mutex poisoned").owner.is_some()
    }

    fn heap(&self) -> std::sync::MutexGuard<'_, Heap> {
        self.heap.lock().expect("sim heap mutex poisoned")
    }

    fn check_guard(&self, lock: &LockGuard<'_>) {
        let guarded = std::ptr::from_ref(lock.runtime()).cast::<()>();
        assert!(
            std::ptr::eq(guarded, std::ptr::from_ref(self).cast::<()>()),
            "lock guard belongs to another runtime"
        );
    }
}

impl ForeignRuntime for SimRuntime {
    fn acquire_lock(&self) -> LockToken {
        let me = thread::current().id();
        let mut state = self.lock.lock().expect("sim lock mutex poisoned");
        if state.owner == Some(me) {
            // unlock first so the outer guard can still release during unwind
            drop(state);
            panic!("global lock acquired recursively");
        }
        while state.owner.is_some() {
            state = self.lock_released.wait(state).expect("sim lock mutex poisoned");
        }
        state.owner = Some(me);
        state.acquisitions += 1;
        LockToken(state.acquisitions)
    }

    fn release_lock(&self, _token: LockToken) {
        let me = thread::current().id();
        let mut state = self.lock.lock().expect("sim lock mutex poisoned");
        assert_eq!(state.owner, Some(me), "global lock released by a thread that does not hold it");
        state.owner = None;
        drop(state);
        self.lock_released.notify_one();
    }

    fn fetch_error(&self, lock: &LockGuard<'_>) -> OwnedTriple {
        self.check_guard(lock);
        std::mem::take(&mut self.heap().error)
    }

    fn install_error(&self, lock: &LockGuard<'_>, triple: OwnedTriple) {
        self.check_guard(lock);
        self.heap().install(triple);
    }

    fn clear_error(&self, lock: &LockGuard<'_>) {
        self.check_guard(lock);
        self.heap().install(OwnedTriple::default());
    }

    fn error_occurred(&self, lock: &LockGuard<'_>) -> bool {
        self.check_guard(lock);
        self.heap().error.exc_type.is_some()
    }

    fn incref(&self, lock: &LockGuard<'_>, handle: ObjectHandle) {
        self.check_guard(lock);
        self.heap().incref(handle);
    }

    fn decref(&self, lock: &LockGuard<'_>, handle: ObjectHandle) {
        self.check_guard(lock);
        self.heap().decref(handle);
    }

    fn set_error(&self, lock: &LockGuard<'_>, exc_type: ForeignExcType, message: &str) {
        self.check_guard(lock);
        let mut heap = self.heap();
        let triple = heap.new_error(SimClass::Exception(exc_type), message, false);
        heap.install(triple);
    }

    fn warn(&self, lock: &LockGuard<'_>, category: WarningCategory, message: &str) -> Result<(), ErrorAlreadySet> {
        self.check_guard(lock);
        let mut heap = self.heap();
        heap.warning_calls.push((category, message.to_owned()));
        if heap.escalate.contains(&category) {
            let triple = heap.new_error(SimClass::Warning(category), message, false);
            heap.install(triple);
            return Err(ErrorAlreadySet);
        }
        Ok(())
    }
}
