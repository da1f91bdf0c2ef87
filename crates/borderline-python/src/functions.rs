//! Extension functions, one per calling convention.
//!
//! Each function runs its native body inside a fresh [`Boundary`] and turns the outcome back
//! into a `PyResult`. A failed call always has its error in CPython's error slot, so the
//! `PyErr` is taken from there rather than built here.

use std::sync::{Arc, Mutex, OnceLock};

use borderline::{Boundary, BoundaryConfig, BoundaryError, ControlSignal, LogTracer, NativeError, WarningCategory, warn};
use pyo3::{
    exceptions::{PyRuntimeError, PyValueError},
    prelude::*,
};

use crate::runtime::PyRuntime;

static CONFIG: OnceLock<Mutex<BoundaryConfig>> = OnceLock::new();

fn config() -> &'static Mutex<BoundaryConfig> {
    CONFIG.get_or_init(|| Mutex::new(BoundaryConfig::default()))
}

fn boundary() -> Boundary<LogTracer> {
    let config = config().lock().expect("boundary config mutex poisoned").clone();
    Boundary::with_tracer(Arc::new(PyRuntime), LogTracer).with_config(config)
}

/// Takes the error a failed boundary call left in the slot.
fn pending_error(py: Python<'_>) -> PyErr {
    PyErr::take(py).unwrap_or_else(|| PyRuntimeError::new_err("boundary call failed without setting an error"))
}

/// A control signal reaching Python has nothing left to dispatch it.
fn escaped_signal(signal: &ControlSignal) -> PyErr {
    PyRuntimeError::new_err(format!("control signal escaped the boundary: {signal}"))
}

fn boundary_error(py: Python<'_>, error: BoundaryError) -> PyErr {
    match error {
        BoundaryError::ErrorAlreadySet => pending_error(py),
        BoundaryError::Control(signal) => escaped_signal(&signal),
    }
}

/// Replaces the message configuration used by later calls.
///
/// Takes the JSON form of the configuration; invalid input raises `ValueError`.
#[pyfunction]
pub fn configure(config_json: &str) -> PyResult<()> {
    let parsed = BoundaryConfig::from_json(config_json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    *config().lock().expect("boundary config mutex poisoned") = parsed;
    Ok(())
}

/// Returns `values[index]`, raising `IndexError` when out of range.
///
/// Uses the failure sentinel convention.
#[pyfunction]
pub fn checked_index(py: Python<'_>, values: Vec<i64>, index: usize) -> PyResult<i64> {
    let result = boundary().call_sentinel(|| {
        values
            .get(index)
            .copied()
            .ok_or_else(|| NativeError::index(format!("index {index} out of bounds for length {}", values.len())))
    });
    match result {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(pending_error(py)),
        Err(signal) => Err(escaped_signal(&signal)),
    }
}

/// Parses a non-negative count, raising `ValueError` on bad input.
///
/// Uses the failure value convention: `-1` with an error set means failure.
#[pyfunction]
pub fn parse_count(py: Python<'_>, text: &str) -> PyResult<i64> {
    let result = boundary().call_or(-1, || match text.trim().parse::<i64>() {
        Ok(count) if count >= 0 => Ok(count),
        Ok(count) => Err(NativeError::value_error(format!("count must be non-negative, got {count}"))),
        Err(error) => Err(NativeError::value_error(format!("invalid count {text:?}: {error}"))),
    });
    match result {
        Ok(-1) if PyErr::occurred(py) => Err(pending_error(py)),
        Ok(count) => Ok(count),
        Err(signal) => Err(escaped_signal(&signal)),
    }
}

/// Doubles `value` after emitting a native `DeprecationWarning`.
///
/// The warning reaches Python's warning filters after the call returns, so an `"error"`
/// filter turns it into a raised `DeprecationWarning`.
#[pyfunction]
pub fn deprecated_double(py: Python<'_>, value: i64) -> PyResult<i64> {
    boundary()
        .call_rethrow(|| {
            warn(WarningCategory::Deprecated, "deprecated_double() is deprecated");
            value
                .checked_mul(2)
                .ok_or_else(|| NativeError::generic(format!("{value} * 2 overflows")))
        })
        .map_err(|e| boundary_error(py, e))
}

/// Calls `callback` from native code.
///
/// If the callback raises, its exception is what Python sees, not the native error the
/// body reports on top of it.
#[pyfunction]
pub fn call_back(py: Python<'_>, callback: &Bound<'_, PyAny>) -> PyResult<Py<PyAny>> {
    boundary()
        .call_rethrow(|| match callback.call0() {
            Ok(value) => Ok(value.unbind()),
            Err(error) => {
                error.restore(py);
                Err(NativeError::generic("callback failed"))
            }
        })
        .map_err(|e| boundary_error(py, e))
}

/// Sends a control signal across the boundary.
///
/// There is nothing in Python to dispatch it, so it surfaces as `RuntimeError`.
#[pyfunction]
pub fn send_signal(py: Python<'_>, payload: String) -> PyResult<()> {
    boundary()
        .call_rethrow(|| Err::<(), _>(NativeError::control(payload)))
        .map_err(|e| boundary_error(py, e))
}
