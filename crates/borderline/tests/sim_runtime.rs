//! Tests for the simulated runtime's ledger, warning channel and lock discipline.

use borderline::{
    ForeignExcType, ForeignRuntime, LockGuard, OwnedTriple, WarningCategory,
    sim::{SimClass, SimError, SimRuntime},
};
use pretty_assertions::assert_eq;

/// Interpreter-raised errors carry a traceback; boundary-installed ones do not.
#[test]
fn raise_and_set_error_shapes() {
    let runtime = SimRuntime::new();
    runtime.raise(ForeignExcType::KeyError, "k");
    let [exc_type, value, traceback] = runtime.pending_handles();
    assert!(exc_type.is_some() && value.is_some() && traceback.is_some());

    {
        let lock = LockGuard::acquire(&runtime);
        runtime.set_error(&lock, ForeignExcType::RuntimeError, "native");
    }
    let [_, _, traceback] = runtime.pending_handles();
    assert_eq!(traceback, None);
    assert_eq!(
        runtime.current_error(),
        Some(SimError::exception(ForeignExcType::RuntimeError, "native"))
    );
    assert_eq!(runtime.live_objects(), 2, "the replaced error was released");
}

/// Only escalated categories turn into errors; every call is recorded.
#[test]
fn warning_channel_escalation() {
    let runtime = SimRuntime::new();
    runtime.escalate(WarningCategory::Future);

    let lock = LockGuard::acquire(&runtime);
    assert_eq!(runtime.warn(&lock, WarningCategory::User, "fine"), Ok(()));
    assert!(!runtime.error_occurred(&lock));
    assert!(runtime.warn(&lock, WarningCategory::Future, "escalated").is_err());
    assert!(runtime.error_occurred(&lock));
    drop(lock);

    assert_eq!(
        runtime.warning_calls(),
        vec![
            (WarningCategory::User, "fine".to_owned()),
            (WarningCategory::Future, "escalated".to_owned()),
        ]
    );
    let error = runtime.current_error().unwrap();
    assert_eq!(error.class, SimClass::Warning(WarningCategory::Future));
}

/// The lock is released when the guard drops and counted on every acquisition.
#[test]
fn lock_guard_releases() {
    let runtime = SimRuntime::new();
    {
        let _lock = LockGuard::acquire(&runtime);
        assert!(runtime.is_locked());
    }
    assert!(!runtime.is_locked());
    assert_eq!(runtime.lock_acquisitions(), 1);
}

/// Taking the lock twice on one thread is a caller bug.
#[test]
#[should_panic(expected = "global lock acquired recursively")]
fn recursive_lock_panics() {
    let runtime = SimRuntime::new();
    let _outer = LockGuard::acquire(&runtime);
    let _inner = LockGuard::acquire(&runtime);
}

/// Releasing an object more times than it was referenced is a caller bug.
#[test]
#[should_panic(expected = "decref of released object")]
fn over_release_panics() {
    let runtime = SimRuntime::new();
    runtime.raise(ForeignExcType::ValueError, "v");
    let lock = LockGuard::acquire(&runtime);
    let triple = runtime.fetch_error(&lock);
    let [_, value, _] = triple.as_array();
    for handle in triple.into_raw().into_iter().flatten() {
        runtime.decref(&lock, handle);
    }
    runtime.decref(&lock, value.unwrap());
}

/// A fetched triple given back through the raw constructor keeps the ledger balanced.
#[test]
fn fetch_and_reinstall_balances() {
    let runtime = SimRuntime::new();
    runtime.raise(ForeignExcType::IndexError, "i");
    let before = runtime.pending_handles();

    let lock = LockGuard::acquire(&runtime);
    let [exc_type, value, traceback] = runtime.fetch_error(&lock).into_raw();
    // SAFETY: the three references came out of `into_raw` and nothing else owns them.
    let triple = unsafe { OwnedTriple::from_raw(exc_type, value, traceback) };
    runtime.install_error(&lock, triple);
    drop(lock);

    assert_eq!(runtime.pending_handles(), before);
    for handle in before.into_iter().flatten() {
        assert_eq!(runtime.refcount(handle), 1, "the slot owns exactly one reference");
    }
    {
        let lock = LockGuard::acquire(&runtime);
        runtime.clear_error(&lock);
    }
    assert_eq!(runtime.live_objects(), 0);
}
