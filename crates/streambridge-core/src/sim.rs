//! Deterministic in-process engine.
//!
//! Produces synthetic RGB frames without any native dependency. Used by the
//! test suite, the demo and FFI builds without the `gstreamer` feature.
//!
//! Accepted URIs:
//!
//! | URI | Media |
//! |-----|-------|
//! | `sim://<name>?duration=<secs>&width=<w>&height=<h>&fps=<f>&streams=<n>` | as given (defaults 10 s, 320×240, 30 fps, 1 stream of each kind) |
//! | `file://<path>` | 10 s, 320×240, 30 fps |
//!
//! Any other scheme fails setup. While playing, every `grab_frame` advances
//! the position by one frame interval; reaching the duration reports
//! `finish()` once. A frame is also ready right after setup, stop and seek
//! (preroll).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::engine::{MediaEngine, NativeCallbacks, NativeSession};
use crate::pipeline::SetupParams;
use crate::runtime::{LogLevel, LogSink, PluginPaths, RuntimeOptions};
use crate::video::{FrameDescriptor, PixelFormat, VideoError};

const DEFAULT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_SIZE: (u32, u32) = (320, 240);
const DEFAULT_FPS: f64 = 30.0;

/// Counters observed by tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    /// Number of `initialize` calls that succeeded
    pub initialize_calls: usize,
    /// Number of `shutdown` calls
    pub shutdown_calls: usize,
    /// Debug spec applied by the last `initialize`
    pub debug_spec: Option<String>,
    /// Sessions with media currently set up
    pub open_sessions: usize,
    /// Sessions created and not yet destroyed
    pub live_sessions: usize,
    /// True between `initialize` and `shutdown`
    pub initialized: bool,
}

#[derive(Default)]
struct SimState {
    stats: SimStats,
    log_sink: Option<LogSink>,
    fail_initialize: bool,
    controllers: HashMap<String, SimController>,
}

impl SimState {
    fn log(&self, level: LogLevel, message: &str) {
        if let Some(sink) = &self.log_sink {
            sink(level, message);
        }
    }
}

/// Simulated media engine.
#[derive(Clone, Default)]
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }

    /// Makes the next `initialize` calls fail until reset.
    pub fn set_fail_initialize(&self, fail: bool) {
        self.state.lock().fail_initialize = fail;
    }

    /// Returns the controller of the live session named `name`.
    pub fn controller(&self, name: &str) -> Option<SimController> {
        self.state.lock().controllers.get(name).cloned()
    }
}

impl MediaEngine for SimEngine {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn initialize(
        &self,
        options: &RuntimeOptions,
        plugins: &PluginPaths,
    ) -> Result<(), VideoError> {
        let mut state = self.state.lock();
        if state.fail_initialize {
            return Err(VideoError::DecoderInit("simulated init failure".into()));
        }
        state.stats.initialize_calls += 1;
        state.stats.initialized = true;
        state.stats.debug_spec = options.debug_spec().map(str::to_owned);
        state.log_sink = options.log_sink().cloned();
        state.log(LogLevel::Info, "sim engine initialized");
        if let Some(spec) = options.debug_spec() {
            state.log(LogLevel::Debug, &format!("debug threshold {spec}"));
        }
        debug!(plugin_dirs = plugins.dirs().len(), "sim engine initialized");
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.log(LogLevel::Info, "sim engine shutting down");
        state.stats.shutdown_calls += 1;
        state.stats.initialized = false;
        state.log_sink = None;
    }

    fn create_session(
        &self,
        name: &str,
        callbacks: NativeCallbacks,
    ) -> Result<Box<dyn NativeSession>, VideoError> {
        let controller = SimController {
            callbacks: callbacks.clone(),
            pending_size: Arc::new(Mutex::new(None)),
            blit_failure: Arc::new(Mutex::new(None)),
        };
        let mut state = self.state.lock();
        state.stats.live_sessions += 1;
        state
            .controllers
            .insert(name.to_owned(), controller.clone());
        Ok(Box::new(SimSession {
            name: name.to_owned(),
            engine: Arc::clone(&self.state),
            callbacks,
            control: controller,
            media: None,
            position: Duration::ZERO,
            playing: false,
            preroll: false,
            finished: false,
            serial: 0,
            ready: None,
            destroyed: false,
        }))
    }
}

/// Injects native-side behavior into a simulated session from any thread.
#[derive(Debug, Clone)]
pub struct SimController {
    callbacks: NativeCallbacks,
    pending_size: Arc<Mutex<Option<(u32, u32)>>>,
    blit_failure: Arc<Mutex<Option<String>>>,
}

impl SimController {
    /// Reports end of stream as the native streaming thread would.
    pub fn emit_finish(&self) {
        self.callbacks.finish();
    }

    /// Reports a native runtime error.
    pub fn emit_error(&self, message: impl Into<String>) {
        self.callbacks.error(message);
    }

    /// Changes the frame size starting with the next grabbed frame.
    pub fn renegotiate(&self, width: u32, height: u32) {
        *self.pending_size.lock() = Some((width.max(1), height.max(1)));
    }

    /// Makes every following `blit` fail with `message`; `None` restores it.
    pub fn fail_blits(&self, message: Option<&str>) {
        *self.blit_failure.lock() = message.map(str::to_owned);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SimMedia {
    duration: Duration,
    size: (u32, u32),
    frame_interval: Duration,
    video: bool,
}

impl SimMedia {
    fn parse(params: &SetupParams) -> Result<Self, VideoError> {
        let url = Url::parse(&params.uri)
            .map_err(|e| VideoError::OpenFailed(format!("{}: {e}", params.uri)))?;

        let mut duration = DEFAULT_DURATION;
        let mut size = DEFAULT_SIZE;
        let mut fps = DEFAULT_FPS;
        let mut streams: i32 = 1;

        match url.scheme() {
            "file" => {}
            "sim" => {
                for (key, value) in url.query_pairs() {
                    let bad = || VideoError::OpenFailed(format!("invalid {key}={value}"));
                    match key.as_ref() {
                        "duration" => {
                            let secs: f64 = value.parse().map_err(|_| bad())?;
                            if !secs.is_finite() || secs <= 0.0 {
                                return Err(bad());
                            }
                            duration = Duration::try_from_secs_f64(secs).map_err(|_| bad())?;
                        }
                        "width" => size.0 = value.parse().map_err(|_| bad())?,
                        "height" => size.1 = value.parse().map_err(|_| bad())?,
                        "fps" => {
                            fps = value.parse().map_err(|_| bad())?;
                            if !fps.is_finite() || fps <= 0.0 {
                                return Err(bad());
                            }
                        }
                        "streams" => streams = value.parse().map_err(|_| bad())?,
                        _ => {}
                    }
                }
                if size.0 == 0 || size.1 == 0 {
                    return Err(VideoError::OpenFailed("frame size must be non-zero".into()));
                }
            }
            other => {
                return Err(VideoError::OpenFailed(format!(
                    "no source for scheme '{other}'"
                )))
            }
        }

        let frame_interval = Duration::try_from_secs_f64(1.0 / fps)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| VideoError::OpenFailed(format!("invalid fps={fps}")))?;

        for (kind, index) in [("video", params.video_index), ("audio", params.audio_index)] {
            if index >= streams {
                return Err(VideoError::UnsupportedFormat(format!(
                    "{kind} index {index} out of range ({streams} streams)"
                )));
            }
        }

        let (left, top, right, bottom) = params.crop.to_pixels(size.0, size.1);
        let cropped = (
            size.0.saturating_sub(left + right).max(1),
            size.1.saturating_sub(top + bottom).max(1),
        );

        Ok(Self {
            duration,
            size: cropped,
            frame_interval,
            video: params.video_index >= 0,
        })
    }
}

struct SimSession {
    name: String,
    engine: Arc<Mutex<SimState>>,
    callbacks: NativeCallbacks,
    control: SimController,
    media: Option<SimMedia>,
    position: Duration,
    playing: bool,
    preroll: bool,
    finished: bool,
    serial: u64,
    ready: Option<FrameDescriptor>,
    destroyed: bool,
}

impl SimSession {
    fn media(&self) -> Result<SimMedia, VideoError> {
        self.media
            .ok_or_else(|| VideoError::Generic(format!("{}: no media set up", self.name)))
    }

    fn frame_size(&mut self, media: &mut SimMedia) -> (u32, u32) {
        if let Some(size) = self.control.pending_size.lock().take() {
            media.size = size;
        }
        media.size
    }
}

impl NativeSession for SimSession {
    fn setup(&mut self, params: &SetupParams) -> Result<(), VideoError> {
        if self.media.is_some() {
            return Err(VideoError::Generic(format!(
                "{}: setup on an open session",
                self.name
            )));
        }
        let media = SimMedia::parse(params)?;
        if let Some(address) = params.sync_address() {
            debug!(
                session = %self.name,
                "slaving to network clock {address}:{}",
                params.sync_port
            );
        }
        let mut engine = self.engine.lock();
        engine.log(LogLevel::Debug, &format!("{}: opened {}", self.name, params.uri));
        engine.stats.open_sessions += 1;
        drop(engine);

        self.media = Some(media);
        self.position = Duration::ZERO;
        self.playing = false;
        self.finished = false;
        self.preroll = true;
        Ok(())
    }

    fn play(&mut self) -> Result<(), VideoError> {
        self.media()?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), VideoError> {
        self.media()?;
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        self.media()?;
        self.playing = false;
        self.position = Duration::ZERO;
        self.finished = false;
        self.preroll = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.media.take().is_some() {
            let mut engine = self.engine.lock();
            engine.stats.open_sessions -= 1;
        }
        self.playing = false;
        self.position = Duration::ZERO;
        self.ready = None;
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.close();
        self.destroyed = true;
        let mut engine = self.engine.lock();
        engine.stats.live_sessions -= 1;
        engine.controllers.remove(&self.name);
    }

    fn duration(&self) -> Option<Duration> {
        self.media.map(|m| m.duration)
    }

    fn position(&self) -> Duration {
        self.position
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        let media = self.media()?;
        self.position = position.min(media.duration);
        self.finished = self.position >= media.duration;
        self.preroll = true;
        Ok(())
    }

    fn grab_frame(&mut self) -> Option<FrameDescriptor> {
        let mut media = self.media?;
        if !media.video {
            self.ready = None;
            return None;
        }

        let advance = self.playing && !self.finished;
        if !advance && !self.preroll {
            self.ready = None;
            return None;
        }
        self.preroll = false;

        if advance {
            self.position = (self.position + media.frame_interval).min(media.duration);
            if self.position >= media.duration {
                self.finished = true;
                self.callbacks.finish();
            }
        }

        let (width, height) = self.frame_size(&mut media);
        self.media = Some(media);
        self.serial += 1;
        self.ready = FrameDescriptor::new(width, height);
        self.ready
    }

    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), VideoError> {
        let ready = self
            .ready
            .ok_or_else(|| VideoError::DecodeFailed("no frame ready".into()))?;
        if let Some(message) = self.control.blit_failure.lock().clone() {
            return Err(VideoError::DecodeFailed(message));
        }
        if ready.size() != (width, height) {
            return Err(VideoError::DecodeFailed(format!(
                "frame is {}x{}, asked for {width}x{height}",
                ready.width, ready.height
            )));
        }
        if dest.len() != ready.byte_len(PixelFormat::Rgb24) {
            return Err(VideoError::DecodeFailed(format!(
                "destination holds {} bytes",
                dest.len()
            )));
        }

        let serial = self.serial as u32;
        for (i, pixel) in dest.chunks_exact_mut(3).enumerate() {
            let x = i as u32 % width;
            let y = i as u32 / width;
            pixel[0] = x.wrapping_add(serial) as u8;
            pixel[1] = y.wrapping_add(serial) as u8;
            pixel[2] = serial as u8 | 1;
        }
        Ok(())
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
