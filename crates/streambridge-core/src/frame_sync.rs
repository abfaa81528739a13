//! Per-cycle frame hand-off from the engine into host-owned memory.
//!
//! Each cycle, after events are drained:
//! 1. ask the source whether a new frame is ready and at what size
//! 2. resize the destination if the size changed (stream renegotiation)
//! 3. copy the pixels
//!
//! The destination is only marked valid once the copy completed, so a
//! failed or interrupted copy never exposes a torn frame.

use tracing::{debug, trace};

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::BridgeError;
use crate::video::{FrameDescriptor, PixelFormat};

/// Something that can report and copy ready frames.
pub trait FrameSource {
    /// Polls for a new frame. Returns its size when one is ready.
    fn grab_frame(&mut self) -> Option<FrameDescriptor>;

    /// Copies the ready frame into `dest` (`width * height` RGB24 pixels).
    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), BridgeError>;
}

/// Resizable RGB24 pixel buffer owned by the host.
#[derive(Debug, Clone)]
pub struct DestinationBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
    valid: bool,
    frames_written: u64,
}

impl Default for DestinationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE.0, DEFAULT_BUFFER_SIZE.1)
    }
}

impl DestinationBuffer {
    /// Pixel layout of the buffer.
    pub const FORMAT: PixelFormat = PixelFormat::Rgb24;

    /// Allocates a zeroed `width`×`height` buffer (minimum 1×1).
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            data: vec![0; Self::len_for(width, height)],
            valid: false,
            frames_written: 0,
        }
    }

    fn len_for(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::FORMAT.bytes_per_pixel()
    }

    /// Returns `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reallocates for a new size. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.data.clear();
        self.data.resize(Self::len_for(self.width, self.height), 0);
        self.valid = false;
    }

    /// Returns the last completely written frame, if any.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.valid.then_some(self.data.as_slice())
    }

    /// Returns true if the buffer holds a complete frame.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the number of frames successfully written.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Runs `write` over the whole buffer; marks it valid only on success.
    pub fn write_with<F>(&mut self, write: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut [u8], u32, u32) -> Result<(), BridgeError>,
    {
        self.valid = false;
        write(&mut self.data, self.width, self.height)?;
        self.valid = true;
        self.frames_written += 1;
        Ok(())
    }
}

/// Per-cycle frame poller.
#[derive(Debug, Default)]
pub struct FrameSync {
    last: Option<FrameDescriptor>,
    resizes: u64,
}

impl FrameSync {
    /// Creates a poller that has seen no frame yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies a newly ready frame from `source` into `dest`.
    ///
    /// Returns `Ok(None)` when no frame is ready; the destination is left
    /// untouched in that case.
    pub fn poll<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        dest: &mut DestinationBuffer,
    ) -> Result<Option<FrameDescriptor>, BridgeError> {
        let Some(frame) = source.grab_frame() else {
            trace!("no frame ready");
            return Ok(None);
        };

        if dest.size() != frame.size() {
            debug!(
                from = ?dest.size(),
                to = ?frame.size(),
                "resizing destination buffer"
            );
            dest.resize(frame.width, frame.height);
            self.resizes += 1;
        }

        dest.write_with(|data, width, height| source.blit(data, width, height))?;
        self.last = Some(frame);
        Ok(Some(frame))
    }

    /// Returns the last frame copied.
    pub fn last_frame(&self) -> Option<FrameDescriptor> {
        self.last
    }

    /// Returns how many times the destination was resized.
    pub fn resize_count(&self) -> u64 {
        self.resizes
    }
}
