//! Host-loop driver.
//!
//! The host calls [`Orchestrator::poll_cycle`] once per render/update cycle.
//! A cycle drains the bridge's events (running the finish/error handlers)
//! and then performs frame sync, so everything queued before the cycle
//! started is handled before the cycle's frame is sampled.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bridge::StreamBridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::events::Event;
use crate::frame_sync::{DestinationBuffer, FrameSync};
use crate::registry::InstanceRegistry;
use crate::runtime::{tracing_log_sink, EngineRuntime, LogSink, RuntimeOptions};
use crate::video::FrameDescriptor;

type FinishHandler = Box<dyn FnMut() + Send>;
type ErrorHandler = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct BridgeEventHandlers {
    on_finish: Option<FinishHandler>,
    on_error: Option<ErrorHandler>,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Events drained and handled this cycle
    pub events_processed: usize,
    /// Frame copied into the destination this cycle
    pub frame: Option<FrameDescriptor>,
}

/// Owns a bridge, its destination buffer and the owner's event handlers.
pub struct Orchestrator {
    config: BridgeConfig,
    bridge: StreamBridge,
    frame_sync: FrameSync,
    destination: Option<DestinationBuffer>,
    handlers: BridgeEventHandlers,
    log_sink: Option<LogSink>,
}

impl Orchestrator {
    /// Creates an orchestrator over the process-wide runtime.
    pub fn new(config: BridgeConfig) -> Self {
        let bridge = StreamBridge::new(config.name.clone());
        Self::with_bridge(config, bridge)
    }

    /// Creates an orchestrator over an explicit runtime and registry.
    pub fn with_runtime(
        config: BridgeConfig,
        runtime: Arc<EngineRuntime>,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        let bridge = StreamBridge::with_runtime(config.name.clone(), runtime, registry);
        Self::with_bridge(config, bridge)
    }

    fn with_bridge(config: BridgeConfig, bridge: StreamBridge) -> Self {
        Self {
            config,
            bridge,
            frame_sync: FrameSync::new(),
            destination: None,
            handlers: BridgeEventHandlers::default(),
            log_sink: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the configuration for editing. Takes effect on the next
    /// `initialize`/`setup_from_config`; the loop flag applies immediately.
    pub fn config_mut(&mut self) -> &mut BridgeConfig {
        &mut self.config
    }

    /// Returns the bridge for queries.
    pub fn bridge(&self) -> &StreamBridge {
        &self.bridge
    }

    /// Direct access for lifecycle calls (play, pause, stop, close...).
    pub fn bridge_mut(&mut self) -> &mut StreamBridge {
        &mut self.bridge
    }

    /// Enables or disables restarting from the beginning on finish.
    pub fn set_loop(&mut self, enabled: bool) {
        self.config.loop_playback = enabled;
    }

    /// Called on the loop thread for every `Finish` event.
    pub fn on_finish(&mut self, handler: impl FnMut() + Send + 'static) {
        self.handlers.on_finish = Some(Box::new(handler));
    }

    /// Called on the loop thread for every `Error` event.
    pub fn on_error(&mut self, handler: impl FnMut(&str) + Send + 'static) {
        self.handlers.on_error = Some(Box::new(handler));
    }

    /// Replaces the default sink (forward into `tracing`) used when debug
    /// output is enabled.
    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.log_sink = Some(sink);
    }

    /// Binds the buffer frames are copied into.
    pub fn bind_destination(&mut self, buffer: DestinationBuffer) {
        self.destination = Some(buffer);
    }

    /// Binds a fresh buffer of the configured initial size.
    pub fn bind_default_destination(&mut self) {
        let (width, height) = self.config.initial_buffer_size;
        self.bind_destination(DestinationBuffer::new(width, height));
    }

    /// Unbinds and returns the destination buffer.
    pub fn take_destination(&mut self) -> Option<DestinationBuffer> {
        self.destination.take()
    }

    /// Returns the bound destination buffer, if any.
    pub fn destination(&self) -> Option<&DestinationBuffer> {
        self.destination.as_ref()
    }

    /// Initializes the bridge with the configured debug output.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        let debug = &self.config.debug;
        let sink = debug
            .enabled
            .then(|| self.log_sink.clone().unwrap_or_else(tracing_log_sink));
        self.bridge
            .set_runtime_options(RuntimeOptions::new(debug.debug_spec(), sink));
        self.bridge.initialize()?;

        if self.destination.is_none() {
            warn!(
                bridge = %self.config.name,
                "no destination buffer bound; frames will be decoded but not visible"
            );
        }
        Ok(())
    }

    /// Sets up the configured URI, stream selection, crop and sync.
    pub fn setup_from_config(&mut self) -> Result<(), BridgeError> {
        self.bridge.setup(self.config.setup_params())
    }

    /// Initialize, set up and play in one go when `initialize_on_start` is set.
    ///
    /// Does nothing if the flag is off or the bridge is already initialized.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if !self.config.initialize_on_start || self.bridge.is_initialized() {
            return Ok(());
        }
        self.initialize()?;
        self.setup_from_config()?;
        self.bridge.play()
    }

    /// Runs one cycle: drain events, then frame sync.
    ///
    /// A native failure while copying the frame goes to the error handler
    /// in the same cycle and the cycle reports no frame.
    pub fn poll_cycle(&mut self) -> Result<CycleReport, BridgeError> {
        if !self.bridge.is_initialized() {
            return Ok(CycleReport::default());
        }

        let events = self.bridge.drain_events();
        let events_processed = events.len();
        for event in events {
            self.handle_event(event);
        }

        let frame = match self.destination.as_mut() {
            Some(destination) => match self.frame_sync.poll(&mut self.bridge, destination) {
                Ok(frame) => frame,
                Err(BridgeError::Native(e)) => {
                    self.handle_event(Event::Error(format!("frame copy failed: {e}")));
                    None
                }
                Err(e) => return Err(e),
            },
            None => {
                if let Some(frame) = self.bridge.grab_frame() {
                    warn!(
                        bridge = %self.config.name,
                        width = frame.width,
                        height = frame.height,
                        "frame ready but no destination buffer bound"
                    );
                }
                None
            }
        };

        Ok(CycleReport {
            events_processed,
            frame,
        })
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Finish => {
                debug!(bridge = %self.config.name, "end of stream");
                if let Some(handler) = self.handlers.on_finish.as_mut() {
                    handler();
                }
                if self.config.loop_playback {
                    if let Err(e) = self.bridge.set_position(0.0) {
                        warn!(bridge = %self.config.name, "could not restart loop: {e}");
                    }
                }
            }
            Event::Error(message) => {
                warn!(bridge = %self.config.name, "native error: {message}");
                if let Some(handler) = self.handlers.on_error.as_mut() {
                    handler(&message);
                }
            }
        }
    }

    /// Returns the frame sync statistics holder.
    pub fn frame_sync(&self) -> &FrameSync {
        &self.frame_sync
    }

    /// Destroys the bridge. Calling it again is a no-op.
    pub fn destroy(&mut self) -> Result<(), BridgeError> {
        self.bridge.destroy()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("bridge", &self.bridge)
            .field("destination", &self.destination.as_ref().map(|d| d.size()))
            .finish()
    }
}
