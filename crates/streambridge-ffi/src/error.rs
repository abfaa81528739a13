//! Error codes for the FFI boundary.

use streambridge_core::{BridgeError, VideoError};

/// FFI error codes matching `include/streambridge.h`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbError {
    Ok = 0,
    NullPtr = 1,
    InvalidArgument = 2,
    NotInitialized = 3,
    AlreadyInitialized = 4,
    Destroyed = 5,
    InvalidState = 6,
    Runtime = 7,
    OpenFailed = 8,
    Decode = 9,
    NoFrameReady = 10,
    BufferSize = 11,
    Internal = 12,
}

impl From<VideoError> for SbError {
    fn from(e: VideoError) -> Self {
        match e {
            VideoError::OpenFailed(_)
            | VideoError::Network(_)
            | VideoError::UnsupportedFormat(_) => SbError::OpenFailed,
            VideoError::DecoderInit(_) => SbError::Runtime,
            VideoError::DecodeFailed(_) => SbError::Decode,
            _ => SbError::Internal,
        }
    }
}

impl From<BridgeError> for SbError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::NotInitialized => SbError::NotInitialized,
            BridgeError::AlreadyInitialized => SbError::AlreadyInitialized,
            BridgeError::Destroyed => SbError::Destroyed,
            BridgeError::InvalidTransition { .. } => SbError::InvalidState,
            BridgeError::InvalidArgument(_) => SbError::InvalidArgument,
            BridgeError::RuntimeInactive | BridgeError::RuntimeUnderflow => SbError::Runtime,
            BridgeError::Native(e) => e.into(),
            BridgeError::NoFrameReady => SbError::NoFrameReady,
            BridgeError::BufferSizeMismatch { .. } => SbError::BufferSize,
        }
    }
}

impl SbError {
    /// Convert to the raw i32 for FFI return.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}
