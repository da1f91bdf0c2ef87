//! Tests for the warning buffer and the process-wide warning handler.
//!
//! The handler slot is global, so every test that installs a buffer or a handler runs
//! serially.

use std::{panic, sync::Arc, thread};

use borderline::{
    BufferInstallError, CollectingHandler, ErrorAlreadySet, ForeignExcType, NoopTracer, RecordingTracer,
    ReplayTarget, SourceLocation, TraceEvent, Warning, WarningBuffer, WarningCategory,
    sim::{SimError, SimRuntime},
    set_warning_handler, warn, warn_at,
};
use pretty_assertions::assert_eq;
use serial_test::serial;

/// Installs a fresh collecting handler as the native warning handler.
fn collect_native() -> Arc<CollectingHandler> {
    let handler = Arc::new(CollectingHandler::new());
    set_warning_handler(handler.clone());
    handler
}

// =============================================================================
// 1. Buffering and foreign replay
// =============================================================================

/// Warnings queue while the buffer is installed and replay to the interpreter in order.
#[test]
#[serial]
fn replays_to_foreign_in_order() {
    let native = collect_native();
    let runtime = SimRuntime::new();

    let buffer = WarningBuffer::install().unwrap();
    warn(WarningCategory::User, "first");
    warn(WarningCategory::Deprecated, "second");
    assert_eq!(buffer.len(), 2);
    assert!(native.warnings().is_empty(), "nothing reaches the native handler mid-call");

    assert_eq!(buffer.release(&runtime, &mut NoopTracer), Ok(()));
    assert_eq!(
        runtime.warning_calls(),
        vec![
            (WarningCategory::User, "first".to_owned()),
            (WarningCategory::Deprecated, "second".to_owned()),
        ]
    );
    assert_eq!(runtime.current_error(), None);
    assert!(native.warnings().is_empty());

    warn(WarningCategory::User, "after");
    assert_eq!(
        native.take(),
        vec![Warning::new(WarningCategory::User, "after")],
        "the previous handler is back"
    );
}

/// An escalated warning stops foreign replay; the rest go to the native handler.
#[test]
#[serial]
fn escalation_mid_replay() {
    let native = collect_native();
    let runtime = SimRuntime::new();
    runtime.escalate(WarningCategory::Deprecated);
    let mut tracer = RecordingTracer::new();

    let buffer = WarningBuffer::install().unwrap();
    warn(WarningCategory::User, "one");
    warn(WarningCategory::Deprecated, "two");
    warn(WarningCategory::User, "three");

    assert_eq!(buffer.release(&runtime, &mut tracer), Err(ErrorAlreadySet));
    assert_eq!(
        runtime.warning_calls(),
        vec![
            (WarningCategory::User, "one".to_owned()),
            (WarningCategory::Deprecated, "two".to_owned()),
        ],
        "replay stops at the escalated warning"
    );
    assert_eq!(
        runtime.current_error(),
        Some(SimError::warning(WarningCategory::Deprecated, "two"))
    );
    assert_eq!(native.take(), vec![Warning::new(WarningCategory::User, "three")]);
    assert_eq!(
        tracer.events(),
        [
            TraceEvent::WarningReplayed {
                category: WarningCategory::User,
                target: ReplayTarget::Foreign,
            },
            TraceEvent::WarningReplayed {
                category: WarningCategory::Deprecated,
                target: ReplayTarget::Foreign,
            },
            TraceEvent::WarningEscalated {
                category: WarningCategory::Deprecated,
            },
            TraceEvent::WarningReplayed {
                category: WarningCategory::User,
                target: ReplayTarget::Native,
            },
        ]
    );
}

// =============================================================================
// 2. Native replay
// =============================================================================

/// With an error already active, warnings go back to the native handler untouched.
#[test]
#[serial]
fn active_error_replays_natively() {
    let native = collect_native();
    let runtime = SimRuntime::new();
    runtime.raise(ForeignExcType::ValueError, "bad value");

    let buffer = WarningBuffer::install().unwrap();
    let location = SourceLocation {
        function: "resize".to_owned(),
        file: "tensor.rs".to_owned(),
        line: 42,
    };
    warn_at(WarningCategory::Runtime, "size overflow", location.clone());

    assert_eq!(buffer.release(&runtime, &mut NoopTracer), Ok(()));
    assert!(runtime.warning_calls().is_empty(), "the interpreter is not warned");
    assert_eq!(
        runtime.current_error(),
        Some(SimError::exception(ForeignExcType::ValueError, "bad value")),
        "the active error is preserved"
    );
    assert_eq!(
        native.take(),
        vec![Warning::new(WarningCategory::Runtime, "size overflow").at(location)]
    );
}

/// Draining never talks to the interpreter.
#[test]
#[serial]
fn drain_to_native() {
    let native = collect_native();

    let buffer = WarningBuffer::install().unwrap();
    warn(WarningCategory::Future, "later");
    buffer.drain_to_native(&mut NoopTracer);

    assert_eq!(native.take(), vec![Warning::new(WarningCategory::Future, "later")]);
}

/// Releasing an empty buffer does not take the interpreter's lock.
#[test]
#[serial]
fn empty_release_skips_lock() {
    let runtime = SimRuntime::new();
    let buffer = WarningBuffer::install().unwrap();
    assert!(buffer.is_empty());
    assert_eq!(buffer.release(&runtime, &mut NoopTracer), Ok(()));
    assert_eq!(runtime.lock_acquisitions(), 0);
}

// =============================================================================
// 3. Scope
// =============================================================================

/// A second buffer cannot be installed while one is active.
#[test]
#[serial]
fn nested_install_fails_fast() {
    let outer = WarningBuffer::install().unwrap();
    assert_eq!(WarningBuffer::install().unwrap_err(), BufferInstallError::Nested);
    outer.drain_to_native(&mut NoopTracer);

    let again = WarningBuffer::install().expect("slot is free after the outer buffer is released");
    drop(again);
}

/// An install from another thread is told apart from a nested one.
#[test]
#[serial]
fn install_from_other_thread_is_concurrent() {
    let owner = WarningBuffer::install().unwrap();
    let refused = thread::spawn(|| WarningBuffer::install().map(drop)).join().unwrap();
    assert_eq!(refused, Err(BufferInstallError::Concurrent));
    owner.drain_to_native(&mut NoopTracer);

    let after = thread::spawn(|| WarningBuffer::install().map(drop)).join().unwrap();
    assert_eq!(after, Ok(()), "any thread may install once the slot is free");
}

/// Warnings emitted by other threads during the call are queued with the call's own.
#[test]
#[serial]
fn other_thread_warnings_join_the_queue() {
    let native = collect_native();
    let buffer = WarningBuffer::install().unwrap();
    thread::spawn(|| warn(WarningCategory::Runtime, "from a worker")).join().unwrap();

    assert_eq!(buffer.len(), 1);
    assert!(native.warnings().is_empty(), "nothing reaches the native handler mid-call");
    buffer.drain_to_native(&mut NoopTracer);
    assert_eq!(native.take(), vec![Warning::new(WarningCategory::Runtime, "from a worker")]);
}

/// Dropping an unreleased buffer restores the handler and re-emits natively.
#[test]
#[serial]
fn drop_restores_handler() {
    let native = collect_native();
    {
        let _buffer = WarningBuffer::install().unwrap();
        warn(WarningCategory::User, "dropped");
    }
    assert_eq!(native.take(), vec![Warning::new(WarningCategory::User, "dropped")]);

    warn(WarningCategory::User, "direct");
    assert_eq!(native.take(), vec![Warning::new(WarningCategory::User, "direct")]);
}

/// A panic inside the buffered region still restores the handler.
#[test]
#[serial]
fn panic_restores_handler() {
    let native = collect_native();

    let result = panic::catch_unwind(|| {
        let _buffer = WarningBuffer::install().unwrap();
        warn(WarningCategory::Runtime, "before panic");
        panic!("native code failed");
    });

    assert!(result.is_err());
    assert_eq!(native.take(), vec![Warning::new(WarningCategory::Runtime, "before panic")]);
    let buffer = WarningBuffer::install().expect("slot is free after unwinding");
    buffer.drain_to_native(&mut NoopTracer);
}

// =============================================================================
// 4. Rendering
// =============================================================================

/// Warnings render with the interpreter's category name and their location.
#[test]
fn warning_display() {
    let warning = Warning::new(WarningCategory::Deprecated, "use resize_()").at(SourceLocation {
        function: "resize".to_owned(),
        file: "tensor.rs".to_owned(),
        line: 7,
    });
    assert_eq!(
        warning.to_string(),
        "DeprecationWarning: use resize_() (resize at tensor.rs:7)"
    );
    assert_eq!(Warning::new(WarningCategory::User, "plain").to_string(), "UserWarning: plain");
}
