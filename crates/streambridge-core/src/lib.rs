//! streambridge-core: native media engine → single-threaded host loop bridge.
//!
//! The native engine decodes on its own worker threads and reports
//! lifecycle events from them. A host render loop polls once per cycle.
//! This crate sits between the two:
//!
//! - Shared runtime: [`runtime`] (reference-counted engine init/teardown)
//! - Callback plumbing: [`registry`] (token → instance), [`events`] (queue drained on the loop thread)
//! - Session lifecycle: [`pipeline`] (state machine over one native session)
//! - Frame hand-off: [`frame_sync`] (resize negotiation and copy)
//! - Host surface: [`bridge`] (one instance), [`orchestrator`] (per-cycle driver)
//! - Engines: [`sim`] (deterministic, always built), `gst_engine` (feature `gstreamer`)
//!
//! ```no_run
//! use streambridge_core::{BridgeConfig, Orchestrator};
//!
//! let mut orchestrator = Orchestrator::new(BridgeConfig::new("sim://demo?duration=5"));
//! orchestrator.bind_default_destination();
//! orchestrator.start()?;
//! loop {
//!     let report = orchestrator.poll_cycle()?;
//!     if let Some(frame) = report.frame {
//!         // upload orchestrator.destination() (frame.width × frame.height RGB24)
//!         let _ = frame;
//!     }
//! #   break;
//! }
//! # Ok::<(), streambridge_core::BridgeError>(())
//! ```

use std::sync::Arc;

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame_sync;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod sim;
pub mod video;

#[cfg(feature = "gstreamer")]
pub mod gst_engine;

pub use bridge::StreamBridge;
pub use config::{BridgeConfig, CropRect, DebugConfig, NetworkSyncConfig, DEFAULT_BUFFER_SIZE};
pub use engine::{MediaEngine, NativeCallbacks, NativeSession};
pub use error::BridgeError;
pub use events::{Event, EventQueue, EventSender};
pub use frame_sync::{DestinationBuffer, FrameSource, FrameSync};
pub use orchestrator::{CycleReport, Orchestrator};
pub use pipeline::{PipelineHandle, PipelineState, SetupParams};
pub use registry::{InstanceRegistry, InstanceToken};
pub use runtime::{EngineRuntime, LogLevel, LogSink, PluginPaths, RuntimeOptions};
pub use sim::{SimController, SimEngine};
pub use video::{FrameDescriptor, PixelFormat, VideoError};

/// Returns the engine the process-wide runtime uses.
///
/// GStreamer when built with the `gstreamer` feature, the simulated engine
/// otherwise.
pub fn default_engine() -> Arc<dyn MediaEngine> {
    #[cfg(feature = "gstreamer")]
    {
        Arc::new(gst_engine::GstEngine::new())
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        Arc::new(SimEngine::new())
    }
}
