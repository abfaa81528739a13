//! FFI boundary safety utilities.
//!
//! Every entry point runs its body inside [`ffi_boundary`] (or
//! [`ffi_boundary_or`] for plain queries) so a panic never unwinds into the
//! host.

use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::SbError;

/// Runs an entry point body, mapping the result and any panic to an error code.
///
/// `AssertUnwindSafe` is sound here because shared state behind the
/// boundary is guarded by `parking_lot::Mutex`, which does not poison.
pub fn ffi_boundary<F>(f: F) -> i32
where
    F: FnOnce() -> Result<(), SbError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => SbError::Ok.as_raw(),
        Ok(Err(e)) => e.as_raw(),
        Err(_panic) => {
            tracing::error!("FFI: caught Rust panic at FFI boundary");
            SbError::Internal.as_raw()
        }
    }
}

/// Runs a query body, returning `default` on panic.
pub fn ffi_boundary_or<T, F>(default: T, f: F) -> T
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(val) => val,
        Err(_panic) => {
            tracing::error!("FFI: caught Rust panic at FFI boundary");
            default
        }
    }
}

/// Reads an optional UTF-8 C string. NULL maps to `None`.
///
/// # Safety
/// `ptr` must be NULL or point to a valid null-terminated string.
pub unsafe fn opt_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, SbError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| SbError::InvalidArgument)
}

/// Validates a pointer is non-null, returning a reference.
///
/// # Safety
/// The pointer must be valid and properly aligned, and no mutable reference
/// to the same allocation may exist while the yielded `&T` is alive.
#[macro_export]
macro_rules! check_not_null {
    ($ptr:expr) => {
        if $ptr.is_null() {
            return Err($crate::error::SbError::NullPtr);
        } else {
            unsafe { &*$ptr }
        }
    };
}
