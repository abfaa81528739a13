//! One bridge instance: token, runtime reference, pipeline and event queue.
//!
//! # Lifecycle
//!
//! ```text
//! initialize:  register token → acquire runtime → create pipeline
//! destroy:     close pipeline → destroy pipeline → release runtime → unregister token
//! ```
//!
//! The token is registered before the pipeline exists and unregistered only
//! after it is destroyed, so every callback the native side can still emit
//! resolves, and nothing resolves afterwards.
//!
//! Native failures of lifecycle calls are not returned to the caller: they
//! are queued as [`Event::Error`] and surface on the next drain, the same way
//! asynchronous engine errors do. Only ordering mistakes and invalid
//! arguments fail synchronously.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::engine::NativeCallbacks;
use crate::error::BridgeError;
use crate::events::{Event, EventQueue};
use crate::frame_sync::{DestinationBuffer, FrameSource};
use crate::pipeline::{PipelineHandle, PipelineState, SetupParams};
use crate::registry::{InstanceRegistry, InstanceToken};
use crate::runtime::{EngineRuntime, RuntimeOptions};
use crate::video::{secs_to_duration, FrameDescriptor};

static INSTANCE_SERIAL: AtomicU64 = AtomicU64::new(0);

struct BridgeInner {
    token: InstanceToken,
    events: EventQueue,
    pipeline: PipelineHandle,
}

/// The operation surface a host render loop drives.
pub struct StreamBridge {
    name: String,
    runtime: Arc<EngineRuntime>,
    registry: Arc<InstanceRegistry>,
    runtime_options: RuntimeOptions,
    inner: Option<BridgeInner>,
    destroyed: bool,
}

impl StreamBridge {
    /// Creates an uninitialized bridge over the process-wide runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_runtime(
            name,
            Arc::clone(EngineRuntime::global()),
            Arc::clone(InstanceRegistry::global()),
        )
    }

    /// Creates an uninitialized bridge over an explicit runtime and registry.
    pub fn with_runtime(
        name: impl Into<String>,
        runtime: Arc<EngineRuntime>,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            runtime,
            registry,
            runtime_options: RuntimeOptions::default(),
            inner: None,
            destroyed: false,
        }
    }

    /// Sets the options used if `initialize` brings the runtime up.
    pub fn set_runtime_options(&mut self, options: RuntimeOptions) {
        self.runtime_options = options;
    }

    /// Returns the instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the runtime this bridge references.
    pub fn runtime(&self) -> &Arc<EngineRuntime> {
        &self.runtime
    }

    /// Registers the token, acquires the runtime and creates the pipeline.
    ///
    /// Any failure rolls back the earlier steps. A destroyed bridge may be
    /// initialized again.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        if self.inner.is_some() {
            return Err(BridgeError::AlreadyInitialized);
        }

        let events = EventQueue::new();
        let token = self.registry.register(events.sender());

        if let Err(e) = self.runtime.acquire(&self.runtime_options) {
            error!(bridge = %self.name, "engine runtime failed to start: {e}");
            self.registry.unregister(token);
            return Err(e);
        }

        let id = format!(
            "{}{}",
            self.name,
            INSTANCE_SERIAL.fetch_add(1, Ordering::Relaxed)
        );
        let callbacks = NativeCallbacks::new(token, Arc::clone(&self.registry));
        let session = match self.runtime.create_session(&id, callbacks) {
            Ok(session) => session,
            Err(e) => {
                error!(bridge = %self.name, "could not create pipeline: {e}");
                if let Err(release) = self.runtime.release() {
                    error!(bridge = %self.name, "rollback failed: {release}");
                }
                self.registry.unregister(token);
                return Err(e);
            }
        };

        info!(bridge = %self.name, pipeline = %id, "bridge initialized");
        self.inner = Some(BridgeInner {
            token,
            events,
            pipeline: PipelineHandle::new(id, session),
        });
        self.destroyed = false;
        Ok(())
    }

    /// Returns true between `initialize` and `destroy`.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the callback token while initialized.
    pub fn token(&self) -> Option<InstanceToken> {
        self.inner.as_ref().map(|inner| inner.token)
    }

    /// Returns the pipeline id while initialized.
    pub fn pipeline_id(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.pipeline.id())
    }

    /// Returns the pipeline state; `None` before the first `initialize`.
    pub fn state(&self) -> Option<PipelineState> {
        match &self.inner {
            Some(inner) => Some(inner.pipeline.state()),
            None if self.destroyed => Some(PipelineState::Destroyed),
            None => None,
        }
    }

    fn inner_mut(&mut self) -> Result<&mut BridgeInner, BridgeError> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner),
            None if self.destroyed => Err(BridgeError::Destroyed),
            None => Err(BridgeError::NotInitialized),
        }
    }

    /// Opens a URI, closing any media that is already open first.
    pub fn setup(&mut self, params: SetupParams) -> Result<(), BridgeError> {
        let inner = self.inner_mut()?;
        if inner.pipeline.state().is_open() {
            debug!(
                pipeline = %inner.pipeline.id(),
                state = %inner.pipeline.state(),
                "closing open pipeline before setup"
            );
            inner.pipeline.close()?;
        }
        let result = inner.pipeline.setup(params);
        inner.queue_native_failure("setup", result)
    }

    /// `Loaded | Paused → Playing`.
    pub fn play(&mut self) -> Result<(), BridgeError> {
        let inner = self.inner_mut()?;
        let result = inner.pipeline.play();
        inner.queue_native_failure("play", result)
    }

    /// `Playing → Paused`.
    pub fn pause(&mut self) -> Result<(), BridgeError> {
        let inner = self.inner_mut()?;
        let result = inner.pipeline.pause();
        inner.queue_native_failure("pause", result)
    }

    /// Rewinds, keeping the media loaded.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        let inner = self.inner_mut()?;
        let result = inner.pipeline.stop();
        inner.queue_native_failure("stop", result)
    }

    /// Releases the open media; the bridge stays usable for a new `setup`.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        self.inner_mut()?.pipeline.close()
    }

    /// Tears everything down. Calling it again is a no-op.
    ///
    /// The runtime reference and the token are released even if the
    /// pipeline reports a teardown failure.
    pub fn destroy(&mut self) -> Result<(), BridgeError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };

        if let Err(e) = inner.pipeline.close() {
            error!(bridge = %self.name, "pipeline close failed during destroy: {e}");
        }
        if let Err(e) = inner.pipeline.destroy() {
            error!(bridge = %self.name, "pipeline destroy failed: {e}");
        }
        drop(inner.pipeline);

        if let Err(e) = self.runtime.release() {
            error!(bridge = %self.name, "engine runtime release failed: {e}");
        }
        self.registry.unregister(inner.token);

        let dropped = inner.events.len();
        if dropped > 0 {
            debug!(bridge = %self.name, dropped, "discarding undrained events");
        }
        self.destroyed = true;
        info!(bridge = %self.name, "bridge destroyed");
        Ok(())
    }

    /// Media duration in seconds; 0 when nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.inner
            .as_ref()
            .map_or(0.0, |inner| inner.pipeline.duration().as_secs_f64())
    }

    /// Playback position in seconds; 0 when nothing is loaded.
    pub fn position(&self) -> f64 {
        self.inner
            .as_ref()
            .map_or(0.0, |inner| inner.pipeline.position().as_secs_f64())
    }

    /// Seeks to `secs`, clamped to `[0, duration]`.
    pub fn set_position(&mut self, secs: f64) -> Result<(), BridgeError> {
        if !secs.is_finite() {
            return Err(BridgeError::InvalidArgument(format!(
                "position must be finite, got {secs}"
            )));
        }
        let inner = self.inner_mut()?;
        let result = inner.pipeline.set_position(secs_to_duration(secs));
        inner.queue_native_failure("seek", result)
    }

    /// Returns true while playing.
    pub fn is_playing(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.pipeline.is_playing())
    }

    /// Polls for a new frame; returns its size when one is ready.
    pub fn grab_frame(&mut self) -> Option<FrameDescriptor> {
        self.inner.as_mut()?.pipeline.grab_frame()
    }

    /// Copies the frame reported by the last `grab_frame` into `dest`.
    ///
    /// `dest` must already be `width`×`height`; see [`crate::FrameSync`] for
    /// the resizing variant.
    pub fn blit_texture(
        &mut self,
        dest: &mut DestinationBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        let inner = self.inner_mut()?;
        if dest.size() != (width, height) {
            return Err(BridgeError::InvalidArgument(format!(
                "destination is {}x{}, asked to write {width}x{height}",
                dest.size().0,
                dest.size().1
            )));
        }
        dest.write_with(|data, w, h| inner.pipeline.blit(data, w, h))
    }

    /// Copies the ready frame into raw host memory of `width * height * 3` bytes.
    pub fn blit_into(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), BridgeError> {
        self.inner_mut()?.pipeline.blit(dest, width, height)
    }

    /// Removes every event queued so far, in arrival order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.inner
            .as_mut()
            .map(|inner| inner.events.drain())
            .unwrap_or_default()
    }
}

impl BridgeInner {
    /// Turns a native failure into a queued error event.
    fn queue_native_failure(
        &mut self,
        op: &'static str,
        result: Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        match result {
            Err(BridgeError::Native(e)) => {
                warn!(pipeline = %self.pipeline.id(), "{op} failed: {e}");
                self.events.push(Event::Error(e.to_string()));
                Ok(())
            }
            other => other,
        }
    }
}

impl FrameSource for StreamBridge {
    fn grab_frame(&mut self) -> Option<FrameDescriptor> {
        StreamBridge::grab_frame(self)
    }

    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), BridgeError> {
        self.blit_into(dest, width, height)
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            error!(bridge = %self.name, "destroy on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBridge")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("token", &self.token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;

    const CLIP: &str = "sim://clip?duration=4&width=16&height=8&fps=25";

    fn fixture() -> (SimEngine, Arc<EngineRuntime>, Arc<InstanceRegistry>) {
        let engine = SimEngine::new();
        let runtime = Arc::new(EngineRuntime::new(Arc::new(engine.clone())));
        (engine, runtime, Arc::new(InstanceRegistry::new()))
    }

    fn bridge(runtime: &Arc<EngineRuntime>, registry: &Arc<InstanceRegistry>) -> StreamBridge {
        StreamBridge::with_runtime("bridge", Arc::clone(runtime), Arc::clone(registry))
    }

    #[test]
    fn test_calls_before_initialize() {
        let (_engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        assert_eq!(b.play(), Err(BridgeError::NotInitialized));
        assert_eq!(
            b.setup(SetupParams::new(CLIP)),
            Err(BridgeError::NotInitialized)
        );
        assert_eq!(b.state(), None);
        assert_eq!(b.duration(), 0.0);
        assert!(b.grab_frame().is_none());
        assert!(b.destroy().is_ok());
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let (engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        assert_eq!(b.initialize(), Err(BridgeError::AlreadyInitialized));
        assert_eq!(runtime.refcount(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(engine.stats().live_sessions, 1);
    }

    #[test]
    fn test_initialize_rolls_back_on_runtime_failure() {
        let (engine, runtime, registry) = fixture();
        engine.set_fail_initialize(true);
        let mut b = bridge(&runtime, &registry);
        assert!(matches!(b.initialize(), Err(BridgeError::Native(_))));
        assert_eq!(runtime.refcount(), 0);
        assert!(registry.is_empty());
        assert!(!b.is_initialized());

        engine.set_fail_initialize(false);
        b.initialize().unwrap();
        assert!(b.is_initialized());
    }

    #[test]
    fn test_double_destroy_tears_down_once() {
        let (engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new(CLIP)).unwrap();
        b.play().unwrap();

        b.destroy().unwrap();
        b.destroy().unwrap();

        assert_eq!(engine.stats().shutdown_calls, 1);
        assert_eq!(runtime.refcount(), 0);
        assert!(registry.is_empty());
        assert_eq!(b.state(), Some(PipelineState::Destroyed));
        assert_eq!(b.play(), Err(BridgeError::Destroyed));
        assert_eq!(b.set_position(1.0), Err(BridgeError::Destroyed));
    }

    #[test]
    fn test_reinitialize_after_destroy() {
        let (engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        let first = b.token().unwrap();
        b.destroy().unwrap();
        b.initialize().unwrap();
        assert_ne!(b.token(), Some(first));
        assert_eq!(b.state(), Some(PipelineState::Closed));
        assert_eq!(engine.stats().initialize_calls, 2);
    }

    #[test]
    fn test_setup_on_loaded_auto_closes() {
        let (engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new(CLIP)).unwrap();
        b.play().unwrap();
        let before = engine.stats().open_sessions;

        b.setup(SetupParams::new("sim://other?duration=9")).unwrap();
        assert_eq!(b.state(), Some(PipelineState::Loaded));
        assert_eq!(b.duration(), 9.0);
        assert_eq!(engine.stats().open_sessions, before);
    }

    #[test]
    fn test_native_setup_failure_becomes_event() {
        let (_engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new("udp://239.0.0.1:5000")).unwrap();
        assert_eq!(b.state(), Some(PipelineState::Closed));

        let events = b.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(msg) if msg.contains("udp")));

        // Ordering mistakes stay synchronous
        assert!(matches!(
            b.play(),
            Err(BridgeError::InvalidTransition { op: "play", .. })
        ));
    }

    #[test]
    fn test_set_position_rejects_non_finite() {
        let (_engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new(CLIP)).unwrap();
        assert!(matches!(
            b.set_position(f64::NAN),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            b.set_position(f64::INFINITY),
            Err(BridgeError::InvalidArgument(_))
        ));
        b.set_position(-5.0).unwrap();
        assert_eq!(b.position(), 0.0);
        b.set_position(100.0).unwrap();
        assert_eq!(b.position(), 4.0);
    }

    #[test]
    fn test_set_position_beyond_duration_range_clamps() {
        let (_engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new(CLIP)).unwrap();

        b.set_position(1e20).unwrap();
        assert_eq!(b.position(), b.duration());
        b.set_position(f64::MAX).unwrap();
        assert_eq!(b.position(), 4.0);
    }

    #[test]
    fn test_destroy_from_every_open_state_releases_runtime_and_token() {
        let (engine, runtime, registry) = fixture();
        for steps in 0..3 {
            let mut b = bridge(&runtime, &registry);
            b.initialize().unwrap();
            b.setup(SetupParams::new(CLIP)).unwrap();
            if steps >= 1 {
                b.play().unwrap();
            }
            if steps >= 2 {
                b.pause().unwrap();
            }

            b.destroy().unwrap();
            assert_eq!(runtime.refcount(), 0, "after {steps} steps");
            assert!(registry.is_empty());
            assert_eq!(b.state(), Some(PipelineState::Destroyed));
        }
        assert_eq!(engine.stats().live_sessions, 0);
        assert_eq!(engine.stats().open_sessions, 0);
    }

    #[test]
    fn test_grab_then_blit_texture() {
        let (_engine, runtime, registry) = fixture();
        let mut b = bridge(&runtime, &registry);
        b.initialize().unwrap();
        b.setup(SetupParams::new(CLIP)).unwrap();

        let mut dest = DestinationBuffer::default();
        assert_eq!(
            b.blit_texture(&mut dest, 64, 64),
            Err(BridgeError::NoFrameReady)
        );

        let frame = b.grab_frame().unwrap();
        assert!(b.blit_texture(&mut dest, frame.width, frame.height).is_err());
        dest.resize(frame.width, frame.height);
        b.blit_texture(&mut dest, frame.width, frame.height).unwrap();
        assert_eq!(dest.pixels().unwrap().len(), 16 * 8 * 3);
    }

    #[test]
    fn test_pipeline_ids_are_unique() {
        let (_engine, runtime, registry) = fixture();
        let mut a = bridge(&runtime, &registry);
        let mut b = bridge(&runtime, &registry);
        a.initialize().unwrap();
        b.initialize().unwrap();
        assert_ne!(a.pipeline_id(), b.pipeline_id());
        assert!(a.pipeline_id().unwrap().starts_with("bridge"));
    }

    #[test]
    fn test_drop_releases_everything() {
        let (engine, runtime, registry) = fixture();
        {
            let mut b = bridge(&runtime, &registry);
            b.initialize().unwrap();
            b.setup(SetupParams::new(CLIP)).unwrap();
        }
        assert_eq!(runtime.refcount(), 0);
        assert!(registry.is_empty());
        assert_eq!(engine.stats().live_sessions, 0);
        assert_eq!(engine.stats().shutdown_calls, 1);
    }
}
