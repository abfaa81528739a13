//! Seam between the bridge and the native media engine.
//!
//! The engine is a black box with its own worker threads. The bridge reaches
//! it through [`MediaEngine`] (process-level init/teardown) and
//! [`NativeSession`] (one decoding session). The engine reaches back only
//! through [`NativeCallbacks`], which never touches bridge state directly.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::events::Event;
use crate::pipeline::SetupParams;
use crate::registry::{InstanceRegistry, InstanceToken};
use crate::runtime::{PluginPaths, RuntimeOptions};
use crate::video::{FrameDescriptor, PixelFormat, VideoError};

/// Process-level hooks of a native media engine.
pub trait MediaEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Initializes the native runtime. Called on the 0→1 runtime transition.
    ///
    /// Applies the debug spec (absent disables native debug output), installs
    /// the log sink if one is given and configures the plugin search path.
    fn initialize(&self, options: &RuntimeOptions, plugins: &PluginPaths)
        -> Result<(), VideoError>;

    /// Tears the native runtime down. Called on the 1→0 runtime transition.
    fn shutdown(&self);

    /// Creates a closed session whose callbacks report through `callbacks`.
    fn create_session(
        &self,
        name: &str,
        callbacks: NativeCallbacks,
    ) -> Result<Box<dyn NativeSession>, VideoError>;
}

/// One native decoding session.
///
/// All methods are called from the host loop thread. The session may run
/// worker threads of its own and report asynchronously via its callbacks.
pub trait NativeSession: Send {
    /// Opens `params.uri` and prerolls it. The session must be closed.
    fn setup(&mut self, params: &SetupParams) -> Result<(), VideoError>;

    /// Starts or resumes playback.
    fn play(&mut self) -> Result<(), VideoError>;

    /// Pauses playback.
    fn pause(&mut self) -> Result<(), VideoError>;

    /// Stops playback and rewinds to the start, keeping the media loaded.
    fn stop(&mut self) -> Result<(), VideoError>;

    /// Releases the media. The session can be set up again afterwards.
    fn close(&mut self);

    /// Releases every native resource. No call is valid afterwards.
    fn destroy(&mut self);

    /// Returns the media duration, if known.
    fn duration(&self) -> Option<Duration>;

    /// Returns the current playback position.
    fn position(&self) -> Duration;

    /// Seeks to `position`, already clamped by the caller.
    fn seek(&mut self, position: Duration) -> Result<(), VideoError>;

    /// Polls for a new frame. Returns its size when one is ready.
    fn grab_frame(&mut self) -> Option<FrameDescriptor>;

    /// Copies the frame reported by the last `grab_frame` into `dest`.
    ///
    /// `dest` holds exactly `width * height` pixels in [`Self::pixel_format`].
    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), VideoError>;

    /// Returns the layout `blit` writes.
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }
}

/// Handle the native engine uses to report lifecycle events from any thread.
///
/// Carries only the instance token. Each report resolves the token and
/// enqueues an [`Event`]; if the instance is already gone the report is
/// dropped.
#[derive(Clone)]
pub struct NativeCallbacks {
    token: InstanceToken,
    registry: Arc<InstanceRegistry>,
}

impl NativeCallbacks {
    /// Creates callbacks that resolve `token` in `registry`.
    pub fn new(token: InstanceToken, registry: Arc<InstanceRegistry>) -> Self {
        Self { token, registry }
    }

    /// Returns the token these callbacks report for.
    pub fn token(&self) -> InstanceToken {
        self.token
    }

    /// End of stream reached.
    pub fn finish(&self) {
        self.dispatch(Event::Finish);
    }

    /// Asynchronous native failure.
    pub fn error(&self, message: impl Into<String>) {
        self.dispatch(Event::Error(message.into()));
    }

    fn dispatch(&self, event: Event) {
        match self.registry.resolve(self.token) {
            Some(sender) => sender.send(event),
            None => trace!(token = ?self.token, "dropping event for unregistered instance"),
        }
    }
}

impl std::fmt::Debug for NativeCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCallbacks")
            .field("token", &self.token)
            .finish()
    }
}
