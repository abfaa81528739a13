//! FFI conformance tests for streambridge-ffi.
//!
//! Run against the built-in simulated engine, so they are skipped when the
//! crate is built with the `gstreamer` feature.

#![cfg(not(feature = "gstreamer"))]

use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use streambridge_ffi::error::SbError;
use streambridge_ffi::handle::SbBridge;
use streambridge_ffi::*;

const SB_OK: i32 = SbError::Ok as i32;
const SB_ERROR_NULL_PTR: i32 = SbError::NullPtr as i32;
const SB_ERROR_INVALID_ARG: i32 = SbError::InvalidArgument as i32;
const SB_ERROR_INVALID_STATE: i32 = SbError::InvalidState as i32;
const SB_ERROR_NO_FRAME: i32 = SbError::NoFrameReady as i32;
const SB_ERROR_BUFFER_SIZE: i32 = SbError::BufferSize as i32;

fn c(s: &'static [u8]) -> *const c_char {
    s.as_ptr() as *const c_char
}

fn create(name: &'static [u8]) -> *mut SbBridge {
    let mut bridge: *mut SbBridge = ptr::null_mut();
    assert_eq!(sb_bridge_create(c(name), &mut bridge), SB_OK);
    assert!(!bridge.is_null());
    bridge
}

fn setup(bridge: *mut SbBridge, uri: &'static [u8]) -> i32 {
    sb_bridge_setup(bridge, c(uri), 0, 0, ptr::null(), 0, 0.0, 0.0, 0.0, 0.0)
}

// =========================================================================
// Lifecycle tests
// =========================================================================

#[test]
fn create_and_destroy() {
    let mut bridge = create(b"ffi-create\0");
    assert_eq!(sb_bridge_destroy(&mut bridge), SB_OK);
    assert!(bridge.is_null());
}

#[test]
fn create_with_null_name_uses_default() {
    let mut bridge: *mut SbBridge = ptr::null_mut();
    assert_eq!(sb_bridge_create(ptr::null(), &mut bridge), SB_OK);
    assert!(!bridge.is_null());
    assert_eq!(sb_bridge_destroy(&mut bridge), SB_OK);
}

#[test]
fn create_with_empty_name_is_rejected() {
    let mut bridge: *mut SbBridge = ptr::null_mut();
    assert_eq!(sb_bridge_create(c(b"\0"), &mut bridge), SB_ERROR_INVALID_ARG);
    assert!(bridge.is_null());
}

#[test]
fn double_destroy_is_safe() {
    let mut bridge = create(b"ffi-double\0");
    assert_eq!(sb_bridge_destroy(&mut bridge), SB_OK);
    assert!(bridge.is_null());

    // *bridge is now NULL, so this is a no-op
    assert_eq!(sb_bridge_destroy(&mut bridge), SB_OK);
}

#[test]
fn destroy_unknown_pointer_is_rejected() {
    let mut bogus = 0x10usize as *mut SbBridge;
    assert_eq!(sb_bridge_destroy(&mut bogus), SbError::Internal as i32);
    assert!(bogus.is_null());
}

#[test]
fn create_registers_and_destroy_unregisters() {
    let mut bridge = create(b"ffi-registry\0");
    assert!(diagnostics::live_bridge_count() >= 1);
    assert!(!diagnostics::register_bridge(bridge as *const u8));
    assert_eq!(sb_bridge_destroy(&mut bridge), SB_OK);
}

// =========================================================================
// NULL safety tests
// =========================================================================

#[test]
fn create_null_out_bridge() {
    assert_eq!(sb_bridge_create(c(b"x\0"), ptr::null_mut()), SB_ERROR_NULL_PTR);
}

#[test]
fn destroy_null_pointer_to_pointer() {
    assert_eq!(sb_bridge_destroy(ptr::null_mut()), SB_ERROR_NULL_PTR);
}

#[test]
fn control_calls_with_null_bridge() {
    assert_eq!(setup(ptr::null_mut(), b"sim://a\0"), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_play(ptr::null_mut()), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_pause(ptr::null_mut()), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_stop(ptr::null_mut()), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_close(ptr::null_mut()), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_set_position(ptr::null_mut(), 1.0), SB_ERROR_NULL_PTR);
    assert_eq!(sb_bridge_set_loop(ptr::null_mut(), true), SB_ERROR_NULL_PTR);
    assert_eq!(
        sb_bridge_set_callbacks(ptr::null_mut(), None, None, ptr::null_mut()),
        SB_ERROR_NULL_PTR
    );
    assert_eq!(
        sb_bridge_poll(ptr::null_mut(), ptr::null_mut(), ptr::null_mut()),
        -SB_ERROR_NULL_PTR
    );
}

#[test]
fn queries_with_null_bridge_return_zero() {
    assert_eq!(sb_bridge_duration(ptr::null()), 0.0);
    assert_eq!(sb_bridge_position(ptr::null()), 0.0);
    assert!(!sb_bridge_is_playing(ptr::null()));
    assert!(!sb_bridge_grab_frame(
        ptr::null_mut(),
        ptr::null_mut(),
        ptr::null_mut()
    ));
}

#[test]
fn setup_null_uri() {
    let mut bridge = create(b"ffi-null-uri\0");
    let err = sb_bridge_setup(bridge, ptr::null(), 0, 0, ptr::null(), 0, 0.0, 0.0, 0.0, 0.0);
    assert_eq!(err, SB_ERROR_NULL_PTR);
    sb_bridge_destroy(&mut bridge);
}

// =========================================================================
// Control and query tests
// =========================================================================

#[test]
fn play_before_setup_is_invalid_state() {
    let mut bridge = create(b"ffi-early-play\0");
    assert_eq!(sb_bridge_play(bridge), SB_ERROR_INVALID_STATE);
    assert!(!sb_bridge_is_playing(bridge));
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn setup_play_pause_stop_close() {
    let mut bridge = create(b"ffi-controls\0");
    assert_eq!(setup(bridge, b"sim://controls?duration=4\0"), SB_OK);
    assert_eq!(sb_bridge_duration(bridge), 4.0);
    assert_eq!(sb_bridge_position(bridge), 0.0);

    assert_eq!(sb_bridge_play(bridge), SB_OK);
    assert!(sb_bridge_is_playing(bridge));
    assert_eq!(sb_bridge_pause(bridge), SB_OK);
    assert!(!sb_bridge_is_playing(bridge));

    assert_eq!(sb_bridge_set_position(bridge, 2.5), SB_OK);
    assert_eq!(sb_bridge_position(bridge), 2.5);
    assert_eq!(sb_bridge_set_position(bridge, 99.0), SB_OK);
    assert_eq!(sb_bridge_position(bridge), 4.0);

    assert_eq!(sb_bridge_stop(bridge), SB_OK);
    assert_eq!(sb_bridge_position(bridge), 0.0);
    assert_eq!(sb_bridge_close(bridge), SB_OK);
    assert_eq!(sb_bridge_duration(bridge), 0.0);
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn set_position_nan_and_infinity_return_invalid_arg() {
    let mut bridge = create(b"ffi-nan\0");
    assert_eq!(setup(bridge, b"sim://nan\0"), SB_OK);

    assert_eq!(sb_bridge_set_position(bridge, f64::NAN), SB_ERROR_INVALID_ARG);
    assert_eq!(
        sb_bridge_set_position(bridge, f64::INFINITY),
        SB_ERROR_INVALID_ARG
    );
    assert_eq!(
        sb_bridge_set_position(bridge, f64::NEG_INFINITY),
        SB_ERROR_INVALID_ARG
    );
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn setup_rejects_out_of_range_sync_port() {
    let mut bridge = create(b"ffi-port\0");
    for port in [-1, 65_536] {
        let err = sb_bridge_setup(
            bridge,
            c(b"sim://port\0"),
            0,
            0,
            c(b"10.0.0.1\0"),
            port,
            0.0,
            0.0,
            0.0,
            0.0,
        );
        assert_eq!(err, SB_ERROR_INVALID_ARG, "port {port}");
    }
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn setup_rejects_crop_outside_unit_range() {
    let mut bridge = create(b"ffi-crop\0");
    let err = sb_bridge_setup(
        bridge,
        c(b"sim://crop\0"),
        0,
        0,
        ptr::null(),
        0,
        -0.5,
        0.0,
        0.0,
        0.0,
    );
    assert_eq!(err, SB_ERROR_INVALID_ARG);
    sb_bridge_destroy(&mut bridge);
}

// =========================================================================
// Frame tests
// =========================================================================

#[test]
fn poll_resizes_destination_and_copies_pixels() {
    let mut bridge = create(b"ffi-poll\0");
    assert_eq!(setup(bridge, b"sim://poll?width=16&height=8\0"), SB_OK);

    let (mut width, mut height) = (0u32, 0u32);
    assert_eq!(sb_bridge_poll(bridge, &mut width, &mut height), 1);
    assert_eq!((width, height), (16, 8));

    let mut pixels = vec![0u8; 16 * 8 * 3];
    assert_eq!(
        sb_bridge_copy_pixels(bridge, pixels.as_mut_ptr(), pixels.len()),
        SB_OK
    );
    assert!(pixels.iter().any(|&b| b != 0));

    let mut short = vec![0u8; 10];
    assert_eq!(
        sb_bridge_copy_pixels(bridge, short.as_mut_ptr(), short.len()),
        SB_ERROR_BUFFER_SIZE
    );

    // Loaded and not playing: nothing new after the preroll frame
    assert_eq!(sb_bridge_poll(bridge, ptr::null_mut(), ptr::null_mut()), 0);
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn copy_pixels_before_any_frame() {
    let mut bridge = create(b"ffi-no-frame\0");
    let mut pixels = vec![0u8; 64 * 64 * 3];
    assert_eq!(
        sb_bridge_copy_pixels(bridge, pixels.as_mut_ptr(), pixels.len()),
        SB_ERROR_NO_FRAME
    );
    assert_eq!(
        sb_bridge_copy_pixels(bridge, ptr::null_mut(), 0),
        SB_ERROR_NULL_PTR
    );
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn grab_then_blit_exact_size() {
    let mut bridge = create(b"ffi-blit\0");
    assert_eq!(setup(bridge, b"sim://blit?width=4&height=2\0"), SB_OK);

    let (mut width, mut height) = (0u32, 0u32);
    assert!(sb_bridge_grab_frame(bridge, &mut width, &mut height));
    assert_eq!((width, height), (4, 2));

    let mut wrong_size = vec![0u8; 4 * 4 * 3];
    assert_eq!(
        sb_bridge_blit(bridge, wrong_size.as_mut_ptr(), wrong_size.len(), 4, 4),
        SB_ERROR_BUFFER_SIZE
    );

    let mut dest = vec![0u8; 4 * 2 * 3];
    assert_eq!(
        sb_bridge_blit(bridge, dest.as_mut_ptr(), dest.len(), width, height),
        SB_OK
    );
    assert!(dest.iter().any(|&b| b != 0));
    sb_bridge_destroy(&mut bridge);
}

// =========================================================================
// Callback tests
// =========================================================================

extern "C" fn count_finish(user_data: *mut c_void) {
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

static ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());

extern "C" fn record_error(_user_data: *mut c_void, message: *const c_char) {
    let message = unsafe { CStr::from_ptr(message) };
    ERRORS.lock().push(message.to_string_lossy().into_owned());
}

#[test]
fn finish_callback_runs_once_without_loop() {
    let finished = AtomicUsize::new(0);
    let mut bridge = create(b"ffi-finish\0");
    assert_eq!(
        sb_bridge_set_callbacks(
            bridge,
            Some(count_finish),
            None,
            &finished as *const AtomicUsize as *mut c_void,
        ),
        SB_OK
    );
    assert_eq!(setup(bridge, b"sim://finish?duration=0.3&fps=10\0"), SB_OK);
    assert_eq!(sb_bridge_play(bridge), SB_OK);

    for _ in 0..12 {
        assert!(sb_bridge_poll(bridge, ptr::null_mut(), ptr::null_mut()) >= 0);
    }
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!((sb_bridge_position(bridge) - 0.3).abs() < 1e-6);
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn loop_restarts_and_finishes_repeatedly() {
    let finished = AtomicUsize::new(0);
    let mut bridge = create(b"ffi-loop\0");
    sb_bridge_set_callbacks(
        bridge,
        Some(count_finish),
        None,
        &finished as *const AtomicUsize as *mut c_void,
    );
    assert_eq!(sb_bridge_set_loop(bridge, true), SB_OK);
    assert_eq!(setup(bridge, b"sim://loop?duration=0.3&fps=10\0"), SB_OK);
    assert_eq!(sb_bridge_play(bridge), SB_OK);

    for _ in 0..12 {
        assert!(sb_bridge_poll(bridge, ptr::null_mut(), ptr::null_mut()) >= 0);
    }
    assert!(finished.load(Ordering::SeqCst) >= 2);
    sb_bridge_destroy(&mut bridge);
}

#[test]
fn open_failure_reaches_error_callback_on_next_poll() {
    let mut bridge = create(b"ffi-open-error\0");
    sb_bridge_set_callbacks(bridge, None, Some(record_error), ptr::null_mut());

    // Native failures are reported as events, not return codes
    assert_eq!(setup(bridge, b"ftp://nowhere/clip.mp4\0"), SB_OK);
    let before = ERRORS.lock().len();
    assert_eq!(sb_bridge_poll(bridge, ptr::null_mut(), ptr::null_mut()), 0);

    let errors = ERRORS.lock();
    assert_eq!(errors.len(), before + 1);
    assert!(errors[before].contains("ftp"), "got {:?}", errors[before]);
    drop(errors);

    // The bridge stays usable for another setup
    assert_eq!(setup(bridge, b"sim://recovered\0"), SB_OK);
    assert!(sb_bridge_duration(bridge) > 0.0);
    sb_bridge_destroy(&mut bridge);
}

// =========================================================================
// Runtime configuration
// =========================================================================

#[test]
fn runtime_configure_accepts_nulls_and_rejects_bad_utf8() {
    assert_eq!(sb_runtime_configure(ptr::null(), None), SB_OK);

    let invalid = b"\xff\xfe\0";
    assert_eq!(
        sb_runtime_configure(c(invalid), None),
        SB_ERROR_INVALID_ARG
    );
}
