//! Pipeline lifecycle state machine.
//!
//! ```text
//!            setup            play
//!   Closed ─────────► Loaded ─────► Playing ◄──┐
//!     ▲  ▲              ▲  ▲          │ pause  │ play
//!     │  │     stop     │  └──────────┼────────┤
//!     │  │              └── Paused ◄──┘        │
//!     │  └──── close (from any state) ─────────┘
//!     │
//!     └─ destroy ─► Destroyed (terminal)
//! ```
//!
//! Rejected transitions leave the state untouched. A native failure during
//! `setup` closes whatever the engine opened and leaves the handle `Closed`.

use std::time::Duration;

use tracing::debug;

use crate::config::CropRect;
use crate::engine::NativeSession;
use crate::error::BridgeError;
use crate::frame_sync::FrameSource;
use crate::video::{FrameDescriptor, PixelFormat};

/// Lifecycle state of a [`PipelineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// No media open; ready for `setup`
    Closed,
    /// Media open and prerolled, not playing
    Loaded,
    /// Playing
    Playing,
    /// Paused mid-playback
    Paused,
    /// Native resources released; terminal
    Destroyed,
}

impl PipelineState {
    /// Returns true for `Loaded`, `Playing` and `Paused`.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            PipelineState::Loaded | PipelineState::Playing | PipelineState::Paused
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Closed => "closed",
            PipelineState::Loaded => "loaded",
            PipelineState::Playing => "playing",
            PipelineState::Paused => "paused",
            PipelineState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Parameters of one `setup` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupParams {
    /// URI to get the stream from
    pub uri: String,
    /// Zero-based video stream index, -1 disables video
    pub video_index: i32,
    /// Zero-based audio stream index, -1 disables audio
    pub audio_index: i32,
    /// Network clock provider; `None` or empty disables network sync
    pub sync_address: Option<String>,
    /// Network clock provider port
    pub sync_port: u16,
    /// Normalized crop margins
    pub crop: CropRect,
}

impl SetupParams {
    /// First video and audio stream, no crop, no network sync.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            video_index: 0,
            audio_index: 0,
            sync_address: None,
            sync_port: 0,
            crop: CropRect::NONE,
        }
    }

    /// Returns the network clock address if synchronization is requested.
    pub fn sync_address(&self) -> Option<&str> {
        self.sync_address.as_deref().filter(|a| !a.is_empty())
    }

    /// Checks the caller-controlled ranges. Stream availability is the
    /// engine's to check.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.uri.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("uri is empty".into()));
        }
        for (name, index) in [("video", self.video_index), ("audio", self.audio_index)] {
            if index < -1 {
                return Err(BridgeError::InvalidArgument(format!(
                    "{name} index must be >= -1, got {index}"
                )));
            }
        }
        self.crop.validate()
    }
}

/// One native decoding session and its lifecycle state.
pub struct PipelineHandle {
    id: String,
    state: PipelineState,
    params: Option<SetupParams>,
    ready: Option<FrameDescriptor>,
    session: Option<Box<dyn NativeSession>>,
}

impl PipelineHandle {
    /// Wraps a freshly created (closed) native session.
    pub fn new(id: impl Into<String>, session: Box<dyn NativeSession>) -> Self {
        let id = id.into();
        debug!(pipeline = %id, "pipeline created");
        Self {
            id,
            state: PipelineState::Closed,
            params: None,
            ready: None,
            session: Some(session),
        }
    }

    /// Returns the unique pipeline id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Returns the parameters of the open media, if any.
    pub fn params(&self) -> Option<&SetupParams> {
        self.params.as_ref()
    }

    /// Returns true while playing.
    pub fn is_playing(&self) -> bool {
        self.state == PipelineState::Playing
    }

    /// Returns the layout of copied frames.
    pub fn pixel_format(&self) -> PixelFormat {
        self.session
            .as_ref()
            .map(|s| s.pixel_format())
            .unwrap_or_default()
    }

    /// Opens `params.uri`. Only valid from `Closed`.
    pub fn setup(&mut self, params: SetupParams) -> Result<(), BridgeError> {
        self.require(&[PipelineState::Closed], "setup")?;
        params.validate()?;
        let session = self.session_mut()?;
        if let Err(e) = session.setup(&params) {
            // Release anything the engine opened before failing
            session.close();
            debug!(pipeline = %self.id, uri = %params.uri, "setup failed: {e}");
            return Err(e.into());
        }
        debug!(pipeline = %self.id, uri = %params.uri, "pipeline loaded");
        self.params = Some(params);
        self.transition(PipelineState::Loaded);
        Ok(())
    }

    /// `Loaded | Paused → Playing`.
    pub fn play(&mut self) -> Result<(), BridgeError> {
        self.require(&[PipelineState::Loaded, PipelineState::Paused], "play")?;
        self.session_mut()?.play()?;
        self.transition(PipelineState::Playing);
        Ok(())
    }

    /// `Playing → Paused`.
    pub fn pause(&mut self) -> Result<(), BridgeError> {
        self.require(&[PipelineState::Playing], "pause")?;
        self.session_mut()?.pause()?;
        self.transition(PipelineState::Paused);
        Ok(())
    }

    /// Rewinds and keeps the media loaded.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        self.require(
            &[
                PipelineState::Loaded,
                PipelineState::Playing,
                PipelineState::Paused,
            ],
            "stop",
        )?;
        self.session_mut()?.stop()?;
        self.ready = None;
        self.transition(PipelineState::Loaded);
        Ok(())
    }

    /// Releases the open media from any state. No-op when already closed.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        if self.state == PipelineState::Destroyed {
            return Err(BridgeError::Destroyed);
        }
        if self.state == PipelineState::Closed {
            return Ok(());
        }
        self.session_mut()?.close();
        self.params = None;
        self.ready = None;
        self.transition(PipelineState::Closed);
        Ok(())
    }

    /// Releases every native resource. Only valid from `Closed`.
    pub fn destroy(&mut self) -> Result<(), BridgeError> {
        self.require(&[PipelineState::Closed], "destroy")?;
        if let Some(mut session) = self.session.take() {
            session.destroy();
        }
        self.transition(PipelineState::Destroyed);
        Ok(())
    }

    /// Returns the media duration, zero when closed or unknown.
    pub fn duration(&self) -> Duration {
        match (&self.session, self.state.is_open()) {
            (Some(session), true) => session.duration().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Returns the playback position, zero when closed.
    pub fn position(&self) -> Duration {
        match (&self.session, self.state.is_open()) {
            (Some(session), true) => session.position(),
            _ => Duration::ZERO,
        }
    }

    /// Seeks, clamping to `[0, duration]` when the duration is known.
    pub fn set_position(&mut self, position: Duration) -> Result<(), BridgeError> {
        self.require(
            &[
                PipelineState::Loaded,
                PipelineState::Playing,
                PipelineState::Paused,
            ],
            "set_position",
        )?;
        let target = match self.session_mut()?.duration() {
            Some(duration) => position.min(duration),
            None => position,
        };
        self.session_mut()?.seek(target)?;
        self.ready = None;
        Ok(())
    }

    fn require(&self, allowed: &[PipelineState], op: &'static str) -> Result<(), BridgeError> {
        if self.state == PipelineState::Destroyed {
            return Err(BridgeError::Destroyed);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            debug!(pipeline = %self.id, state = %self.state, "rejected {op}");
            Err(BridgeError::InvalidTransition {
                op,
                state: self.state,
            })
        }
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn NativeSession>, BridgeError> {
        self.session.as_mut().ok_or(BridgeError::Destroyed)
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(pipeline = %self.id, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }
}

impl FrameSource for PipelineHandle {
    fn grab_frame(&mut self) -> Option<FrameDescriptor> {
        self.ready = if self.state.is_open() {
            self.session.as_mut().and_then(|s| s.grab_frame())
        } else {
            None
        };
        self.ready
    }

    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), BridgeError> {
        if self.state == PipelineState::Destroyed {
            return Err(BridgeError::Destroyed);
        }
        let ready = self.ready.ok_or(BridgeError::NoFrameReady)?;
        if ready.size() != (width, height) {
            return Err(BridgeError::BufferSizeMismatch {
                expected: ready.size(),
                actual: (width, height),
            });
        }
        let expected_len = ready.byte_len(self.pixel_format());
        if dest.len() != expected_len {
            return Err(BridgeError::InvalidArgument(format!(
                "destination holds {} bytes, frame needs {expected_len}",
                dest.len()
            )));
        }
        self.session_mut()?.blit(dest, width, height)?;
        Ok(())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if self.state.is_open() {
                session.close();
            }
            session.destroy();
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MediaEngine, NativeCallbacks};
    use crate::events::EventQueue;
    use crate::registry::InstanceRegistry;
    use crate::sim::SimEngine;
    use std::sync::Arc;

    const CLIP: &str = "sim://clip?duration=2&width=8&height=4&fps=10";

    fn pipeline(engine: &SimEngine) -> PipelineHandle {
        let registry = Arc::new(InstanceRegistry::new());
        let queue = EventQueue::new();
        let token = registry.register(queue.sender());
        let session = engine
            .create_session("test", NativeCallbacks::new(token, registry))
            .unwrap();
        PipelineHandle::new("test0", session)
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Play,
        Pause,
        Stop,
        Close,
    }

    fn expected(state: PipelineState, op: Op) -> Option<PipelineState> {
        use PipelineState::*;
        match (op, state) {
            (Op::Play, Loaded | Paused) => Some(Playing),
            (Op::Pause, Playing) => Some(Paused),
            (Op::Stop, Loaded | Playing | Paused) => Some(Loaded),
            (Op::Close, _) => Some(Closed),
            _ => None,
        }
    }

    fn apply(pipeline: &mut PipelineHandle, op: Op) -> Result<(), BridgeError> {
        match op {
            Op::Play => pipeline.play(),
            Op::Pause => pipeline.pause(),
            Op::Stop => pipeline.stop(),
            Op::Close => pipeline.close(),
        }
    }

    #[test]
    fn test_transition_table_over_all_sequences() {
        let ops = [Op::Play, Op::Pause, Op::Stop, Op::Close];
        let engine = SimEngine::new();
        // Every sequence of three ops starting from Loaded
        for a in ops {
            for b in ops {
                for c in ops {
                    let mut p = pipeline(&engine);
                    p.setup(SetupParams::new(CLIP)).unwrap();
                    for op in [a, b, c] {
                        let before = p.state();
                        let result = apply(&mut p, op);
                        match expected(before, op) {
                            Some(next) => {
                                assert!(result.is_ok(), "{op:?} from {before}");
                                assert_eq!(p.state(), next, "{op:?} from {before}");
                            }
                            None => {
                                assert!(
                                    matches!(result, Err(BridgeError::InvalidTransition { .. })),
                                    "{op:?} from {before}"
                                );
                                assert_eq!(p.state(), before);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_setup_only_from_closed() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        p.setup(SetupParams::new(CLIP)).unwrap();
        let err = p.setup(SetupParams::new(CLIP)).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidTransition {
                op: "setup",
                state: PipelineState::Loaded
            }
        );
        assert_eq!(p.state(), PipelineState::Loaded);
    }

    #[test]
    fn test_setup_failure_stays_closed() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        let err = p.setup(SetupParams::new("rtsp://camera/1")).unwrap_err();
        assert!(matches!(err, BridgeError::Native(_)));
        assert_eq!(p.state(), PipelineState::Closed);
        assert!(p.params().is_none());

        // Still usable
        p.setup(SetupParams::new(CLIP)).unwrap();
        assert_eq!(p.state(), PipelineState::Loaded);
    }

    #[test]
    fn test_invalid_params_rejected_before_native_call() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        let mut params = SetupParams::new(CLIP);
        params.video_index = -2;
        assert!(matches!(
            p.setup(params),
            Err(BridgeError::InvalidArgument(_))
        ));
        let mut params = SetupParams::new(CLIP);
        params.crop = CropRect::new(0.0, 0.0, 1.5, 0.0);
        assert!(matches!(
            p.setup(params),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            p.setup(SetupParams::new("")),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert_eq!(p.state(), PipelineState::Closed);
    }

    #[test]
    fn test_destroy_requires_closed_and_is_terminal() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        p.setup(SetupParams::new(CLIP)).unwrap();
        assert!(matches!(
            p.destroy(),
            Err(BridgeError::InvalidTransition { .. })
        ));
        p.close().unwrap();
        p.destroy().unwrap();
        assert_eq!(p.state(), PipelineState::Destroyed);

        assert_eq!(p.destroy(), Err(BridgeError::Destroyed));
        assert_eq!(p.close(), Err(BridgeError::Destroyed));
        assert_eq!(p.play(), Err(BridgeError::Destroyed));
        assert_eq!(
            p.setup(SetupParams::new(CLIP)),
            Err(BridgeError::Destroyed)
        );
        assert_eq!(p.duration(), Duration::ZERO);
        assert_eq!(p.position(), Duration::ZERO);
        assert!(p.grab_frame().is_none());
        assert_eq!(engine.stats().open_sessions, 0);
    }

    #[test]
    fn test_queries_zero_when_closed() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        assert_eq!(p.duration(), Duration::ZERO);
        assert_eq!(p.position(), Duration::ZERO);
        assert!(matches!(
            p.set_position(Duration::from_secs(1)),
            Err(BridgeError::InvalidTransition { .. })
        ));
        p.setup(SetupParams::new(CLIP)).unwrap();
        assert_eq!(p.duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_set_position_clamps_to_duration() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        p.setup(SetupParams::new(CLIP)).unwrap();
        p.set_position(Duration::from_secs(60)).unwrap();
        assert_eq!(p.position(), Duration::from_secs(2));
        p.set_position(Duration::from_millis(500)).unwrap();
        assert_eq!(p.position(), Duration::from_millis(500));
    }

    #[test]
    fn test_stop_rewinds() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        p.setup(SetupParams::new(CLIP)).unwrap();
        p.play().unwrap();
        for _ in 0..5 {
            p.grab_frame();
        }
        assert!(p.position() > Duration::ZERO);
        p.stop().unwrap();
        assert_eq!(p.position(), Duration::ZERO);
        assert_eq!(p.state(), PipelineState::Loaded);
    }

    #[test]
    fn test_blit_requires_ready_frame_of_matching_size() {
        let engine = SimEngine::new();
        let mut p = pipeline(&engine);
        let mut dest = vec![0u8; 8 * 4 * 3];
        assert_eq!(p.blit(&mut dest, 8, 4), Err(BridgeError::NoFrameReady));

        p.setup(SetupParams::new(CLIP)).unwrap();
        let frame = p.grab_frame().expect("preroll frame");
        assert_eq!(frame.size(), (8, 4));
        assert_eq!(
            p.blit(&mut dest, 4, 8),
            Err(BridgeError::BufferSizeMismatch {
                expected: (8, 4),
                actual: (4, 8)
            })
        );
        assert!(matches!(
            p.blit(&mut dest[..10], 8, 4),
            Err(BridgeError::InvalidArgument(_))
        ));
        p.blit(&mut dest, 8, 4).unwrap();
        assert!(dest.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_drop_releases_open_session() {
        let engine = SimEngine::new();
        {
            let mut p = pipeline(&engine);
            p.setup(SetupParams::new(CLIP)).unwrap();
            p.play().unwrap();
            assert_eq!(engine.stats().open_sessions, 1);
        }
        assert_eq!(engine.stats().open_sessions, 0);
    }
}
