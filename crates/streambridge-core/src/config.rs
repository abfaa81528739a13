//! Host-facing configuration.
//!
//! Plain structs with defaults matching the behavior hosts expect out of the
//! box: first video and audio stream, no cropping, no network clock, native
//! debug output off.

use crate::error::BridgeError;
use crate::pipeline::SetupParams;

/// Initial destination buffer size before the first frame arrives.
pub const DEFAULT_BUFFER_SIZE: (u32, u32) = (64, 64);

/// Normalized margins to crop from the decoded frame, each in `[0, 1]`.
///
/// Degenerate crops (`left + right >= 1`) are passed through untouched;
/// rendering them is the engine's concern.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CropRect {
    /// Amount to crop from the left margin
    pub left: f32,
    /// Amount to crop from the top margin
    pub top: f32,
    /// Amount to crop from the right margin
    pub right: f32,
    /// Amount to crop from the bottom margin
    pub bottom: f32,
}

impl CropRect {
    /// No cropping.
    pub const NONE: CropRect = CropRect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    /// Creates a crop rect from its four margins.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Checks every margin lies in `[0, 1]`.
    pub fn validate(&self) -> Result<(), BridgeError> {
        for (name, value) in [
            ("left", self.left),
            ("top", self.top),
            ("right", self.right),
            ("bottom", self.bottom),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(BridgeError::InvalidArgument(format!(
                    "crop {name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Returns true if no margin is cropped.
    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    /// Converts the fractions into pixel margins for a `width`×`height` frame.
    ///
    /// Returns `(left, top, right, bottom)`.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let px = |fraction: f32, extent: u32| (fraction * extent as f32).round() as u32;
        (
            px(self.left, width),
            px(self.top, height),
            px(self.right, width),
            px(self.bottom, height),
        )
    }
}

/// Network clock synchronization settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkSyncConfig {
    /// If false, the address and port are ignored
    pub enabled: bool,
    /// IP address or host name of the network clock provider
    pub master_clock_address: String,
    /// Port of the network clock provider
    pub master_clock_port: u16,
}

impl NetworkSyncConfig {
    /// Returns the clock address if synchronization is enabled and configured.
    pub fn address(&self) -> Option<&str> {
        if self.enabled && !self.master_clock_address.is_empty() {
            Some(self.master_clock_address.as_str())
        } else {
            None
        }
    }
}

/// Native engine debug output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugConfig {
    /// Forward native log lines to the host log sink
    pub enabled: bool,
    /// `category:level[,category:level...]` list; empty disables native debug output
    pub gst_debug_spec: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gst_debug_spec: "2".to_string(),
        }
    }
}

impl DebugConfig {
    /// Returns the debug spec, or `None` if it is empty.
    pub fn debug_spec(&self) -> Option<&str> {
        let spec = self.gst_debug_spec.trim();
        (!spec.is_empty()).then_some(spec)
    }
}

/// Full configuration of one bridge instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Instance name; the pipeline id is this name plus a per-process serial
    pub name: String,
    /// URI to get the stream from
    pub uri: String,
    /// Zero-based index of the video stream (-1 disables video)
    pub video_index: i32,
    /// Zero-based index of the audio stream (-1 disables audio)
    pub audio_index: i32,
    /// Play from the beginning when the media reaches the end
    pub loop_playback: bool,
    /// Initialize, set up and play on `Orchestrator::start`
    pub initialize_on_start: bool,
    /// Crop margins
    pub crop: CropRect,
    /// Network clock synchronization
    pub sync: NetworkSyncConfig,
    /// Native debug output
    pub debug: DebugConfig,
    /// Size of the destination buffer before the first frame arrives
    pub initial_buffer_size: (u32, u32),
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "streambridge".to_string(),
            uri: String::new(),
            video_index: 0,
            audio_index: 0,
            loop_playback: false,
            initialize_on_start: true,
            crop: CropRect::NONE,
            sync: NetworkSyncConfig::default(),
            debug: DebugConfig::default(),
            initial_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Creates a default configuration for `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Builds the setup parameters this configuration describes.
    pub fn setup_params(&self) -> SetupParams {
        SetupParams {
            uri: self.uri.clone(),
            video_index: self.video_index,
            audio_index: self.audio_index,
            sync_address: self.sync.address().map(str::to_owned),
            sync_port: self.sync.master_clock_port,
            crop: self.crop,
        }
    }
}
