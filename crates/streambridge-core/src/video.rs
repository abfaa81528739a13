//! Frame and native error types shared by the bridge and its engines.

use std::time::Duration;

/// Errors reported by the native media engine.
///
/// These are runtime failures (open, decode, seek, sink) as opposed to
/// caller mistakes, which are [`crate::BridgeError`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoError {
    /// Failed to open the media source
    OpenFailed(String),
    /// Engine or session initialization failed
    DecoderInit(String),
    /// Frame decoding or copy error
    DecodeFailed(String),
    /// Seek operation failed
    SeekFailed(String),
    /// Unsupported codec, format or stream selection
    UnsupportedFormat(String),
    /// Network error (streaming or network clock)
    Network(String),
    /// Generic error
    Generic(String),
}

impl std::fmt::Display for VideoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoError::OpenFailed(msg) => write!(f, "Failed to open media: {msg}"),
            VideoError::DecoderInit(msg) => write!(f, "Engine initialization failed: {msg}"),
            VideoError::DecodeFailed(msg) => write!(f, "Frame decode failed: {msg}"),
            VideoError::SeekFailed(msg) => write!(f, "Seek failed: {msg}"),
            VideoError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {msg}"),
            VideoError::Network(msg) => write!(f, "Network error: {msg}"),
            VideoError::Generic(msg) => write!(f, "Media error: {msg}"),
        }
    }
}

impl std::error::Error for VideoError {}

/// Pixel layout of frames handed across the native/host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// RGB 24-bit, tightly packed
    #[default]
    Rgb24,
    /// RGBA 32-bit
    Rgba,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// Size of a frame reported ready by the engine.
///
/// May change between cycles when the stream renegotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDescriptor {
    /// Width in pixels (always > 0)
    pub width: u32,
    /// Height in pixels (always > 0)
    pub height: u32,
}

impl FrameDescriptor {
    /// Creates a descriptor, or `None` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Returns `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns the number of pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns the number of bytes a frame of this size occupies in `format`.
    pub fn byte_len(&self, format: PixelFormat) -> usize {
        self.pixel_count() * format.bytes_per_pixel()
    }
}

/// Converts host-facing seconds into a [`Duration`], saturating at zero and
/// [`Duration::MAX`].
///
/// Callers must reject non-finite values first.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
