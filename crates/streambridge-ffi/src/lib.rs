//! C FFI layer for streambridge-core.
//!
//! Provides `#[no_mangle] pub extern "C"` entry points matching
//! `include/streambridge.h` for hosts whose render loop lives in another
//! language. A host typically calls:
//!
//! ```text
//! sb_runtime_configure   (optional, before the first create)
//! sb_bridge_create
//! sb_bridge_set_callbacks / sb_bridge_set_loop
//! sb_bridge_setup → sb_bridge_play
//! every frame: sb_bridge_poll → sb_bridge_copy_pixels when it returned 1
//! sb_bridge_destroy
//! ```
//!
//! Error-returning entry points return 0 on success and an [`SbError`] code
//! otherwise. `sb_bridge_poll` returns the negated code on error.

// FFI functions take raw pointers without `unsafe` on the fn signature.
// Safety is enforced inside each function body via null checks + ffi_boundary().
#![allow(clippy::not_unsafe_ptr_arg_deref)]
#![allow(clippy::macro_metavars_in_unsafe)]

pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod safety;

use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use streambridge_core::{BridgeConfig, CropRect, Orchestrator, SetupParams};

use crate::error::SbError;
use crate::handle::{to_c_string, SbBridge, SbErrorFn, SbFinishFn, SbLogFn, UserData};
use crate::safety::{ffi_boundary, ffi_boundary_or, opt_str};

// =========================================================================
// Runtime configuration
// =========================================================================

#[derive(Default)]
struct RuntimeConfig {
    debug_spec: Option<String>,
    log_fn: Option<SbLogFn>,
}

static RUNTIME_CONFIG: LazyLock<Mutex<RuntimeConfig>> =
    LazyLock::new(|| Mutex::new(RuntimeConfig::default()));

/// Sets the native debug spec and log callback.
///
/// Applied when the engine runtime next starts (first live bridge). An
/// empty or NULL `debug_spec` disables native debug output; a NULL
/// `log_fn` leaves native log lines unforwarded.
///
/// # Safety
/// `debug_spec` must be NULL or a valid null-terminated UTF-8 C string.
#[no_mangle]
pub extern "C" fn sb_runtime_configure(debug_spec: *const c_char, log_fn: Option<SbLogFn>) -> i32 {
    ffi_boundary(|| {
        let spec = unsafe { opt_str(debug_spec) }?;
        let mut config = RUNTIME_CONFIG.lock();
        config.debug_spec = spec.map(str::to_owned);
        config.log_fn = log_fn;
        Ok(())
    })
}

fn apply_runtime_config(config: &mut BridgeConfig, orchestrator_sink: &mut Option<SbLogFn>) {
    let runtime = RUNTIME_CONFIG.lock();
    if let Some(spec) = &runtime.debug_spec {
        config.debug.gst_debug_spec = spec.clone();
    }
    config.debug.enabled = runtime.log_fn.is_some();
    *orchestrator_sink = runtime.log_fn;
}

// =========================================================================
// Bridge lifecycle
// =========================================================================

/// Creates and initializes a bridge.
///
/// `name` may be NULL for the default instance name. The bridge starts with
/// a 64×64 destination buffer.
///
/// # Safety
/// - `name` must be NULL or a valid null-terminated UTF-8 C string.
/// - `out_bridge` must be a valid non-null pointer to a `*mut SbBridge`.
#[no_mangle]
pub extern "C" fn sb_bridge_create(name: *const c_char, out_bridge: *mut *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        if out_bridge.is_null() {
            return Err(SbError::NullPtr);
        }
        // Null out first so callers always see NULL on failure
        unsafe {
            *out_bridge = std::ptr::null_mut();
        }

        let mut config = BridgeConfig::default();
        if let Some(name) = unsafe { opt_str(name) }? {
            if name.is_empty() {
                return Err(SbError::InvalidArgument);
            }
            config.name = name.to_owned();
        }
        config.initialize_on_start = false;

        let mut log_fn = None;
        apply_runtime_config(&mut config, &mut log_fn);

        let mut orchestrator = Orchestrator::new(config);
        if let Some(log_fn) = log_fn {
            orchestrator.set_log_sink(Arc::new(move |level, message| {
                let text = to_c_string(message);
                log_fn(level.as_raw(), text.as_ptr());
            }));
        }
        orchestrator.bind_default_destination();
        orchestrator.initialize()?;

        let raw = Box::into_raw(Box::new(SbBridge {
            orchestrator: Mutex::new(orchestrator),
        }));
        diagnostics::register_bridge(raw as *const u8);
        unsafe {
            *out_bridge = raw;
        }
        Ok(())
    })
}

/// Destroys a bridge and frees all resources.
///
/// # Safety
/// - `bridge` must be a valid non-null pointer to a `*mut SbBridge`.
/// - After return, `*bridge` is NULL. Destroying a NULL handle is a no-op.
#[no_mangle]
pub extern "C" fn sb_bridge_destroy(bridge: *mut *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        if bridge.is_null() {
            return Err(SbError::NullPtr);
        }

        // Read and null the handle in one step so two racing destroys
        // cannot both reach Box::from_raw.
        let atomic = unsafe { AtomicPtr::from_ptr(bridge) };
        let bridge_ptr = atomic.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if bridge_ptr.is_null() {
            return Ok(());
        }

        if !diagnostics::unregister_bridge(bridge_ptr as *const u8) {
            tracing::error!(
                "FFI: sb_bridge_destroy called with unknown pointer {:?} (possible double-free)",
                bridge_ptr
            );
            return Err(SbError::Internal);
        }

        let bridge = unsafe { Box::from_raw(bridge_ptr) };
        bridge.with_orchestrator(|o| o.destroy())?;
        Ok(())
    })
}

/// Opens a URI. Any media already open is closed first.
///
/// `video_index`/`audio_index` of -1 disable that stream. A NULL or empty
/// `sync_address` disables network clock synchronization. Crop margins are
/// fractions in `[0, 1]`.
///
/// Native failures to open are reported through the error callback on the
/// next poll, not through the return value.
///
/// # Safety
/// - `bridge` must be a valid non-null `SbBridge` pointer.
/// - `uri` must be a valid null-terminated UTF-8 C string.
/// - `sync_address` must be NULL or a valid null-terminated UTF-8 C string.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn sb_bridge_setup(
    bridge: *mut SbBridge,
    uri: *const c_char,
    video_index: i32,
    audio_index: i32,
    sync_address: *const c_char,
    sync_port: i32,
    crop_left: f32,
    crop_top: f32,
    crop_right: f32,
    crop_bottom: f32,
) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        let uri = unsafe { opt_str(uri) }?.ok_or(SbError::NullPtr)?;
        let sync_address = unsafe { opt_str(sync_address) }?;
        let sync_port = u16::try_from(sync_port).map_err(|_| SbError::InvalidArgument)?;

        let params = SetupParams {
            uri: uri.to_owned(),
            video_index,
            audio_index,
            sync_address: sync_address.map(str::to_owned),
            sync_port,
            crop: CropRect::new(crop_left, crop_top, crop_right, crop_bottom),
        };
        bridge.with_orchestrator(|o| o.bridge_mut().setup(params))?;
        Ok(())
    })
}

/// Starts or resumes playback.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_play(bridge: *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        bridge.with_orchestrator(|o| o.bridge_mut().play())?;
        Ok(())
    })
}

/// Pauses playback.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_pause(bridge: *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        bridge.with_orchestrator(|o| o.bridge_mut().pause())?;
        Ok(())
    })
}

/// Stops playback and rewinds, keeping the media loaded.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_stop(bridge: *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        bridge.with_orchestrator(|o| o.bridge_mut().stop())?;
        Ok(())
    })
}

/// Releases the open media. The bridge can be set up again.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_close(bridge: *mut SbBridge) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        bridge.with_orchestrator(|o| o.bridge_mut().close())?;
        Ok(())
    })
}

// =========================================================================
// Queries and seeking
// =========================================================================

/// Returns the media duration in seconds (0.0 on NULL or when nothing is loaded).
///
/// # Safety
/// `bridge` must be NULL or a valid `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_duration(bridge: *const SbBridge) -> f64 {
    ffi_boundary_or(0.0, || {
        if bridge.is_null() {
            return 0.0;
        }
        let bridge = unsafe { &*bridge };
        bridge.with_orchestrator(|o| o.bridge().duration())
    })
}

/// Returns the playback position in seconds (0.0 on NULL or when nothing is loaded).
///
/// # Safety
/// `bridge` must be NULL or a valid `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_position(bridge: *const SbBridge) -> f64 {
    ffi_boundary_or(0.0, || {
        if bridge.is_null() {
            return 0.0;
        }
        let bridge = unsafe { &*bridge };
        bridge.with_orchestrator(|o| o.bridge().position())
    })
}

/// Seeks to `position_secs`, clamped to `[0, duration]`. NaN and infinities
/// are rejected.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_set_position(bridge: *mut SbBridge, position_secs: f64) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        if !position_secs.is_finite() {
            return Err(SbError::InvalidArgument);
        }
        bridge.with_orchestrator(|o| o.bridge_mut().set_position(position_secs))?;
        Ok(())
    })
}

/// Returns true while playing (false on NULL).
///
/// # Safety
/// `bridge` must be NULL or a valid `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_is_playing(bridge: *const SbBridge) -> bool {
    ffi_boundary_or(false, || {
        if bridge.is_null() {
            return false;
        }
        let bridge = unsafe { &*bridge };
        bridge.with_orchestrator(|o| o.bridge().is_playing())
    })
}

// =========================================================================
// Events
// =========================================================================

/// Installs the finish and error callbacks. Either may be NULL.
///
/// Callbacks run inside `sb_bridge_poll`, on the calling thread.
///
/// # Safety
/// - `bridge` must be a valid non-null `SbBridge` pointer.
/// - `user_data` must stay valid until the callbacks are replaced or the
///   bridge is destroyed.
#[no_mangle]
pub extern "C" fn sb_bridge_set_callbacks(
    bridge: *mut SbBridge,
    on_finish: Option<SbFinishFn>,
    on_error: Option<SbErrorFn>,
    user_data: *mut c_void,
) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        let user_data = UserData(user_data);
        bridge.with_orchestrator(|o| {
            match on_finish {
                Some(callback) => o.on_finish(move || callback(user_data.get())),
                None => o.on_finish(|| {}),
            }
            match on_error {
                Some(callback) => o.on_error(move |message| {
                    let text = to_c_string(message);
                    callback(user_data.get(), text.as_ptr());
                }),
                None => o.on_error(|_| {}),
            }
        });
        Ok(())
    })
}

/// Enables or disables restarting from the beginning on end of stream.
///
/// # Safety
/// `bridge` must be a valid non-null `SbBridge` pointer.
#[no_mangle]
pub extern "C" fn sb_bridge_set_loop(bridge: *mut SbBridge, enabled: bool) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        bridge.with_orchestrator(|o| o.set_loop(enabled));
        Ok(())
    })
}

// =========================================================================
// Per-cycle polling and frames
// =========================================================================

/// Runs one cycle: delivers queued events to the callbacks, then copies a
/// newly ready frame into the bridge's destination buffer.
///
/// Writes the destination size to `out_width`/`out_height` (either may be
/// NULL). Returns 1 if a new frame was copied, 0 if not, and a negated
/// [`SbError`] code on failure.
///
/// # Safety
/// - `bridge` must be a valid non-null `SbBridge` pointer.
/// - `out_width`/`out_height` must be NULL or valid `u32` pointers.
#[no_mangle]
pub extern "C" fn sb_bridge_poll(
    bridge: *mut SbBridge,
    out_width: *mut u32,
    out_height: *mut u32,
) -> i32 {
    ffi_boundary_or(-SbError::Internal.as_raw(), || {
        if bridge.is_null() {
            return -SbError::NullPtr.as_raw();
        }
        let bridge = unsafe { &*bridge };
        bridge.with_orchestrator(|o| {
            let report = match o.poll_cycle() {
                Ok(report) => report,
                Err(e) => return -SbError::from(e).as_raw(),
            };
            if let Some((width, height)) = o.destination().map(|d| d.size()) {
                unsafe {
                    if !out_width.is_null() {
                        *out_width = width;
                    }
                    if !out_height.is_null() {
                        *out_height = height;
                    }
                }
            }
            i32::from(report.frame.is_some())
        })
    })
}

/// Copies the destination buffer (width × height × 3 bytes, RGB24) into
/// host memory.
///
/// # Safety
/// - `bridge` must be a valid non-null `SbBridge` pointer.
/// - `dst` must point to at least `dst_len` writable bytes.
#[no_mangle]
pub extern "C" fn sb_bridge_copy_pixels(bridge: *mut SbBridge, dst: *mut u8, dst_len: usize) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        if dst.is_null() {
            return Err(SbError::NullPtr);
        }
        bridge.with_orchestrator(|o| {
            let pixels = o
                .destination()
                .and_then(|d| d.pixels())
                .ok_or(SbError::NoFrameReady)?;
            if dst_len < pixels.len() {
                return Err(SbError::BufferSize);
            }
            unsafe {
                std::ptr::copy_nonoverlapping(pixels.as_ptr(), dst, pixels.len());
            }
            Ok(())
        })
    })
}

/// Polls for a new frame without running a cycle. Returns true and writes
/// its size when one is ready.
///
/// # Safety
/// - `bridge` must be NULL or a valid `SbBridge` pointer.
/// - `out_width`/`out_height` must be NULL or valid `u32` pointers.
#[no_mangle]
pub extern "C" fn sb_bridge_grab_frame(
    bridge: *mut SbBridge,
    out_width: *mut u32,
    out_height: *mut u32,
) -> bool {
    ffi_boundary_or(false, || {
        if bridge.is_null() {
            return false;
        }
        let bridge = unsafe { &*bridge };
        let Some(frame) = bridge.with_orchestrator(|o| o.bridge_mut().grab_frame()) else {
            return false;
        };
        unsafe {
            if !out_width.is_null() {
                *out_width = frame.width;
            }
            if !out_height.is_null() {
                *out_height = frame.height;
            }
        }
        true
    })
}

/// Copies the frame reported by the last `sb_bridge_grab_frame` into
/// host memory of exactly `width * height * 3` bytes.
///
/// # Safety
/// - `bridge` must be a valid non-null `SbBridge` pointer.
/// - `dst` must point to `dst_len` writable bytes.
#[no_mangle]
pub extern "C" fn sb_bridge_blit(
    bridge: *mut SbBridge,
    dst: *mut u8,
    dst_len: usize,
    width: u32,
    height: u32,
) -> i32 {
    ffi_boundary(|| {
        let bridge = check_not_null!(bridge);
        if dst.is_null() {
            return Err(SbError::NullPtr);
        }
        let dest = unsafe { std::slice::from_raw_parts_mut(dst, dst_len) };
        bridge.with_orchestrator(|o| o.bridge_mut().blit_into(dest, width, height))?;
        Ok(())
    })
}
