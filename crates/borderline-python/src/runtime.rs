//! [`ForeignRuntime`] on top of the CPython C API.
//!
//! Handles are raw `PyObject` pointers with their provenance exposed, so a handle captured on
//! one thread can be turned back into a pointer on another.

use std::{ffi::CString, ptr};

use borderline::{
    ErrorAlreadySet, ForeignExcType, ForeignRuntime, LockGuard, LockToken, ObjectHandle, OwnedTriple, WarningCategory,
};
use pyo3::ffi;

/// The running CPython interpreter.
///
/// Stateless: every call goes straight to the C API. The interpreter must be initialised,
/// which is always the case inside an extension module.
#[derive(Debug, Clone, Copy, Default)]
pub struct PyRuntime;

fn handle(object: *mut ffi::PyObject) -> Option<ObjectHandle> {
    ObjectHandle::from_addr(object.expose_provenance())
}

fn object(handle: Option<ObjectHandle>) -> *mut ffi::PyObject {
    handle.map_or(ptr::null_mut(), |h| ptr::with_exposed_provenance_mut(h.addr()))
}

/// Builds a C string for the C API, dropping interior NULs instead of failing.
fn c_message(message: &str) -> CString {
    let bytes: Vec<u8> = message.bytes().filter(|b| *b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

fn exception_class(exc_type: ForeignExcType) -> *mut ffi::PyObject {
    // SAFETY: the builtin exception statics are set during interpreter start-up and never
    // written again; they are read by value, not by reference.
    unsafe {
        match exc_type {
            ForeignExcType::Exception => ffi::PyExc_Exception,
            ForeignExcType::RuntimeError => ffi::PyExc_RuntimeError,
            ForeignExcType::NotImplementedError => ffi::PyExc_NotImplementedError,
            ForeignExcType::IndexError => ffi::PyExc_IndexError,
            ForeignExcType::KeyError => ffi::PyExc_KeyError,
            ForeignExcType::TypeError => ffi::PyExc_TypeError,
            ForeignExcType::ValueError => ffi::PyExc_ValueError,
            ForeignExcType::AttributeError => ffi::PyExc_AttributeError,
            ForeignExcType::MemoryError => ffi::PyExc_MemoryError,
            ForeignExcType::OverflowError => ffi::PyExc_OverflowError,
        }
    }
}

fn warning_class(category: WarningCategory) -> *mut ffi::PyObject {
    // SAFETY: as for `exception_class`.
    unsafe {
        match category {
            WarningCategory::User => ffi::PyExc_UserWarning,
            WarningCategory::Deprecated => ffi::PyExc_DeprecationWarning,
            WarningCategory::Runtime => ffi::PyExc_RuntimeWarning,
            WarningCategory::Future => ffi::PyExc_FutureWarning,
        }
    }
}

impl ForeignRuntime for PyRuntime {
    fn acquire_lock(&self) -> LockToken {
        // SAFETY: the interpreter is initialised; PyGILState_Ensure may be called from any
        // thread and nests.
        let state = unsafe { ffi::PyGILState_Ensure() };
        LockToken(match state {
            ffi::PyGILState_STATE::PyGILState_LOCKED => 0,
            ffi::PyGILState_STATE::PyGILState_UNLOCKED => 1,
        })
    }

    fn release_lock(&self, token: LockToken) {
        let state = if token.0 == 0 {
            ffi::PyGILState_STATE::PyGILState_LOCKED
        } else {
            ffi::PyGILState_STATE::PyGILState_UNLOCKED
        };
        // SAFETY: `token` came from the matching `acquire_lock` on this thread.
        unsafe { ffi::PyGILState_Release(state) };
    }

    fn fetch_error(&self, _lock: &LockGuard<'_>) -> OwnedTriple {
        let mut exc_type = ptr::null_mut();
        let mut value = ptr::null_mut();
        let mut traceback = ptr::null_mut();
        // SAFETY: the GIL is held; the out pointers are valid locals.
        unsafe { ffi::PyErr_Fetch(&raw mut exc_type, &raw mut value, &raw mut traceback) };
        // SAFETY: PyErr_Fetch hands over one new reference per non-null pointer, and the slot
        // it came from is now empty.
        unsafe { OwnedTriple::from_raw(handle(exc_type), handle(value), handle(traceback)) }
    }

    fn install_error(&self, _lock: &LockGuard<'_>, triple: OwnedTriple) {
        let [exc_type, value, traceback] = triple.into_raw();
        // SAFETY: the GIL is held and each handle is an owned reference, which PyErr_Restore steals.
        unsafe { ffi::PyErr_Restore(object(exc_type), object(value), object(traceback)) };
    }

    fn clear_error(&self, _lock: &LockGuard<'_>) {
        // SAFETY: the GIL is held.
        unsafe { ffi::PyErr_Clear() };
    }

    fn error_occurred(&self, _lock: &LockGuard<'_>) -> bool {
        // SAFETY: the GIL is held; the result is a borrowed pointer only compared against null.
        !unsafe { ffi::PyErr_Occurred() }.is_null()
    }

    fn incref(&self, _lock: &LockGuard<'_>, handle: ObjectHandle) {
        // SAFETY: the GIL is held and `handle` refers to a live object we own a reference to.
        unsafe { ffi::Py_IncRef(object(Some(handle))) };
    }

    fn decref(&self, _lock: &LockGuard<'_>, handle: ObjectHandle) {
        // SAFETY: the GIL is held and we give up one owned reference to `handle`.
        unsafe { ffi::Py_DecRef(object(Some(handle))) };
    }

    fn set_error(&self, _lock: &LockGuard<'_>, exc_type: ForeignExcType, message: &str) {
        let message = c_message(message);
        // SAFETY: the GIL is held and `message` outlives the call.
        unsafe { ffi::PyErr_SetString(exception_class(exc_type), message.as_ptr()) };
    }

    fn warn(&self, _lock: &LockGuard<'_>, category: WarningCategory, message: &str) -> Result<(), ErrorAlreadySet> {
        let message = c_message(message);
        // SAFETY: the GIL is held and `message` outlives the call.
        let status = unsafe { ffi::PyErr_WarnEx(warning_class(category), message.as_ptr(), 1) };
        if status < 0 { Err(ErrorAlreadySet) } else { Ok(()) }
    }
}

