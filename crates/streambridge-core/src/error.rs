//! Caller-facing error type.

use crate::pipeline::PipelineState;
use crate::video::VideoError;

/// Errors returned synchronously to the owner of a bridge.
///
/// Native runtime failures normally travel as [`crate::Event::Error`] instead;
/// [`BridgeError::Native`] only escapes where the caller asked for a native
/// operation directly (runtime init, session creation, frame copy).
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Operation requires `initialize()` first
    NotInitialized,
    /// `initialize()` called twice without an intervening `destroy()`
    AlreadyInitialized,
    /// Operation invoked after `destroy()`
    Destroyed,
    /// Operation not permitted in the current pipeline state
    InvalidTransition {
        /// Name of the rejected operation
        op: &'static str,
        /// State the pipeline was in
        state: PipelineState,
    },
    /// Argument outside its valid range
    InvalidArgument(String),
    /// The shared engine runtime has no live reference
    RuntimeInactive,
    /// Runtime released more times than acquired
    RuntimeUnderflow,
    /// Native engine failure
    Native(VideoError),
    /// `blit` called without a preceding ready `grab_frame`
    NoFrameReady,
    /// Destination size does not match the ready frame
    BufferSizeMismatch {
        /// Size of the ready frame
        expected: (u32, u32),
        /// Size that was passed in
        actual: (u32, u32),
    },
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::NotInitialized => write!(f, "bridge is not initialized"),
            BridgeError::AlreadyInitialized => write!(f, "bridge is already initialized"),
            BridgeError::Destroyed => write!(f, "bridge used after destroy"),
            BridgeError::InvalidTransition { op, state } => {
                write!(f, "{op} is not allowed while {state}")
            }
            BridgeError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            BridgeError::RuntimeInactive => write!(f, "engine runtime is not active"),
            BridgeError::RuntimeUnderflow => {
                write!(f, "engine runtime released with no outstanding reference")
            }
            BridgeError::Native(e) => write!(f, "{e}"),
            BridgeError::NoFrameReady => write!(f, "no frame is ready to copy"),
            BridgeError::BufferSizeMismatch { expected, actual } => write!(
                f,
                "destination is {}x{} but the ready frame is {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Native(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VideoError> for BridgeError {
    fn from(e: VideoError) -> Self {
        BridgeError::Native(e)
    }
}

impl BridgeError {
    /// Returns true for lifecycle-order errors (wrong state, wrong call order).
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            BridgeError::NotInitialized
                | BridgeError::AlreadyInitialized
                | BridgeError::Destroyed
                | BridgeError::InvalidTransition { .. }
                | BridgeError::RuntimeUnderflow
        )
    }
}
