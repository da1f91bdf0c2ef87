//! Python bindings for borderline.
//!
//! Provides [`PyRuntime`], the CPython implementation of borderline's runtime capability
//! surface, and a small extension module whose functions exercise each calling convention.

mod functions;
mod runtime;

use std::sync::OnceLock;

use pyo3::prelude::*;

pub use functions::{call_back, checked_index, configure, deprecated_double, parse_count, send_signal};
pub use runtime::PyRuntime;

/// Returns the package version, converting Cargo's format to Python's PEP 440.
fn get_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();

    VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        // "1.0-alpha1" in cargo is "1.0a1" in python; close enough for our versions
        version.replace("-alpha", "a").replace("-beta", "b")
    })
}

/// borderline - error and warning reconciliation for native extensions.
#[pymodule]
mod _borderline {
    use pyo3::prelude::*;

    #[pymodule_export]
    use super::call_back;
    #[pymodule_export]
    use super::checked_index;
    #[pymodule_export]
    use super::configure;
    #[pymodule_export]
    use super::deprecated_double;
    use super::get_version;
    #[pymodule_export]
    use super::parse_count;
    #[pymodule_export]
    use super::send_signal;

    #[pymodule_init]
    fn init(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("__version__", get_version())?;
        Ok(())
    }
}
