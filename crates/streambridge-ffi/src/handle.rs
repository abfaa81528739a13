//! FFI handle types.
//!
//! [`SbBridge`] wraps an `Orchestrator` with a `Mutex`. Hosts normally call
//! everything from their render thread, but the lock keeps a stray call from
//! another thread from racing the loop.

use std::ffi::{c_char, c_void, CString};

use parking_lot::Mutex;

use streambridge_core::Orchestrator;

/// Called on the host loop thread for each end-of-stream event.
pub type SbFinishFn = extern "C" fn(user_data: *mut c_void);

/// Called on the host loop thread for each native error. `message` is only
/// valid for the duration of the call.
pub type SbErrorFn = extern "C" fn(user_data: *mut c_void, message: *const c_char);

/// Receives native log lines from any engine thread.
pub type SbLogFn = extern "C" fn(level: i32, message: *const c_char);

/// Host context pointer handed back to callbacks unchanged.
#[derive(Clone, Copy)]
pub(crate) struct UserData(pub *mut c_void);

// The host owns the pointee and promises it is usable from the loop thread,
// which is the only thread handlers run on.
unsafe impl Send for UserData {}

impl UserData {
    /// Returns the raw pointer. Taking `self` keeps closures capturing the
    /// whole (`Send`) wrapper rather than the bare pointer field.
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

/// Opaque bridge handle exposed via FFI.
///
/// Each FFI call acquires the lock exactly once. No nested locking.
pub struct SbBridge {
    pub(crate) orchestrator: Mutex<Orchestrator>,
}

impl SbBridge {
    /// Runs a closure with exclusive access to the orchestrator.
    pub fn with_orchestrator<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Orchestrator) -> R,
    {
        let mut orchestrator = self.orchestrator.lock();
        f(&mut orchestrator)
    }
}

/// Converts a message for C, replacing interior NULs.
pub(crate) fn to_c_string(message: &str) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}
