//! GStreamer engine.
//!
//! Each session is a `playbin` whose video sink is a small bin:
//!
//! ```text
//! playbin ── video-sink: [ videocrop ! videoconvert ! appsink(RGB) ]
//!         └─ audio-sink: autoaudiosink (or fakesink when disabled)
//! ```
//!
//! EOS and ERROR messages are caught in a bus sync handler, i.e. on the
//! GStreamer streaming thread that posted them, and forwarded through
//! [`NativeCallbacks`]. During `setup` errors are held back and returned
//! from `setup` instead, so a failed open reports exactly once.
//!
//! The appsink keeps at most one buffer and drops older ones: a host loop
//! that polls slower than the stream frame rate always sees the latest frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gstreamer as gst;
use gst::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_net as gst_net;
use gstreamer_video as gst_video;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{MediaEngine, NativeCallbacks, NativeSession};
use crate::pipeline::SetupParams;
use crate::runtime::{LogLevel, PluginPaths, RuntimeOptions};
use crate::video::{FrameDescriptor, VideoError};

const PREROLL_TIMEOUT_SECS: u64 = 10;

/// Engine backed by the system GStreamer installation.
#[derive(Default)]
pub struct GstEngine {
    log_function: Mutex<Option<gst::log::DebugLogFunction>>,
}

impl GstEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn log_level(level: gst::DebugLevel) -> LogLevel {
    match level {
        gst::DebugLevel::Error => LogLevel::Error,
        gst::DebugLevel::Warning | gst::DebugLevel::Fixme => LogLevel::Warning,
        gst::DebugLevel::Info => LogLevel::Info,
        gst::DebugLevel::Debug => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

impl MediaEngine for GstEngine {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn initialize(
        &self,
        options: &RuntimeOptions,
        plugins: &PluginPaths,
    ) -> Result<(), VideoError> {
        // Must happen before gst::init scans the registry
        plugins.prepend_to_env("GST_PLUGIN_PATH");

        gst::init().map_err(|e| VideoError::DecoderInit(format!("GStreamer init failed: {e}")))?;

        match options.debug_spec() {
            Some(spec) => {
                gst::log::set_active(true);
                gst::log::set_threshold_from_string(spec, true);
            }
            None => gst::log::set_default_threshold(gst::DebugLevel::None),
        }

        if let Some(sink) = options.log_sink().cloned() {
            gst::log::remove_default_log_function();
            let function = gst::log::add_log_function(
                move |category, level, _file, _function, _line, _object, message| {
                    if let Some(text) = message.get() {
                        sink(log_level(level), &format!("{}: {text}", category.name()));
                    }
                },
            );
            *self.log_function.lock() = Some(function);
        }

        let (major, minor, micro, _) = gst::version();
        info!("GStreamer {major}.{minor}.{micro} initialized");
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(function) = self.log_function.lock().take() {
            gst::log::remove_log_function(function);
        }
        // GStreamer cannot be re-initialized after gst_deinit, so the
        // library itself stays loaded for the rest of the process.
        gst::log::set_default_threshold(gst::DebugLevel::None);
        debug!("GStreamer runtime released");
    }

    fn create_session(
        &self,
        name: &str,
        callbacks: NativeCallbacks,
    ) -> Result<Box<dyn NativeSession>, VideoError> {
        Ok(Box::new(GstSession {
            name: name.to_owned(),
            callbacks,
            loaded: None,
        }))
    }
}

struct Loaded {
    playbin: gst::Element,
    appsink: Option<gst_app::AppSink>,
    /// Sample handed out by the last `grab_frame`
    ready: Option<gst::Sample>,
    /// Next sample to hand out before pulling from the sink
    pending: Option<gst::Sample>,
    /// Pull the preroll sample next (after a seek while paused)
    want_preroll: bool,
}

impl Loaded {
    fn shutdown(self) {
        if let Some(bus) = self.playbin.bus() {
            bus.unset_sync_handler();
        }
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            warn!("failed to set playbin to Null: {e}");
        }
        let _ = self.playbin.state(gst::ClockTime::from_seconds(2));
    }
}

struct GstSession {
    name: String,
    callbacks: NativeCallbacks,
    loaded: Option<Loaded>,
}

fn make(factory: &str) -> Result<gst::Element, VideoError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| VideoError::DecoderInit(format!("Failed to create {factory}: {e}")))
}

fn video_branch(name: &str) -> Result<(gst::Bin, gst::Element, gst_app::AppSink), VideoError> {
    let crop = make("videocrop")?;
    let convert = make("videoconvert")?;
    let appsink = gst_app::AppSink::builder()
        .caps(
            &gst_video::VideoCapsBuilder::new()
                .format(gst_video::VideoFormat::Rgb)
                .build(),
        )
        .max_buffers(1)
        .drop(true)
        .build();

    let bin = gst::Bin::builder().name(format!("{name}-video")).build();
    bin.add_many([&crop, &convert, appsink.upcast_ref()])
        .map_err(|e| VideoError::DecoderInit(format!("Failed to add video elements: {e}")))?;
    gst::Element::link_many([&crop, &convert, appsink.upcast_ref()])
        .map_err(|e| VideoError::DecoderInit(format!("Failed to link video elements: {e}")))?;

    let target = crop
        .static_pad("sink")
        .ok_or_else(|| VideoError::DecoderInit("videocrop has no sink pad".into()))?;
    let ghost = gst::GhostPad::with_target(&target)
        .map_err(|e| VideoError::DecoderInit(format!("Failed to create ghost pad: {e}")))?;
    bin.add_pad(&ghost)
        .map_err(|e| VideoError::DecoderInit(format!("Failed to add ghost pad: {e}")))?;

    Ok((bin, crop, appsink))
}

fn sample_size(sample: &gst::Sample) -> Option<(u32, u32)> {
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    Some((info.width(), info.height()))
}

impl GstSession {
    fn loaded(&mut self) -> Result<&mut Loaded, VideoError> {
        self.loaded
            .as_mut()
            .ok_or_else(|| VideoError::Generic(format!("{}: no media set up", self.name)))
    }

    fn set_state(&mut self, state: gst::State) -> Result<(), VideoError> {
        self.loaded()?
            .playbin
            .set_state(state)
            .map(|_| ())
            .map_err(|e| VideoError::Generic(format!("Failed to set {state:?}: {e:?}")))
    }

    fn open(
        &self,
        params: &SetupParams,
        held_error: &Arc<Mutex<Option<String>>>,
        armed: &Arc<AtomicBool>,
    ) -> Result<Loaded, VideoError> {
        let playbin = gst::ElementFactory::make("playbin")
            .name(self.name.as_str())
            .property("uri", params.uri.as_str())
            .build()
            .map_err(|e| VideoError::DecoderInit(format!("Failed to create playbin: {e}")))?;

        let (crop, appsink) = if params.video_index >= 0 {
            let (bin, crop, appsink) = video_branch(&self.name)?;
            playbin.set_property("video-sink", &bin);
            (Some(crop), Some(appsink))
        } else {
            playbin.set_property("video-sink", &make("fakesink")?);
            (None, None)
        };
        if params.audio_index < 0 {
            playbin.set_property("audio-sink", &make("fakesink")?);
        }

        let bus = playbin
            .bus()
            .ok_or_else(|| VideoError::DecoderInit("Pipeline has no bus".into()))?;
        let callbacks = self.callbacks.clone();
        let held = Arc::clone(held_error);
        let armed_flag = Arc::clone(armed);
        bus.set_sync_handler(move |_bus, msg| {
            match msg.view() {
                gst::MessageView::Eos(_) if armed_flag.load(Ordering::Acquire) => {
                    callbacks.finish();
                }
                gst::MessageView::Error(err) => {
                    let text = match err.debug() {
                        Some(detail) => format!("{} ({detail})", err.error()),
                        None => err.error().to_string(),
                    };
                    if armed_flag.load(Ordering::Acquire) {
                        callbacks.error(text);
                    } else {
                        let mut first = held.lock();
                        if first.is_none() {
                            *first = Some(text);
                        }
                    }
                }
                _ => {}
            }
            gst::BusSyncReply::Drop
        });

        let mut loaded = Loaded {
            playbin,
            appsink,
            ready: None,
            pending: None,
            want_preroll: false,
        };

        if let Some(address) = params.sync_address() {
            let pipeline = loaded
                .playbin
                .downcast_ref::<gst::Pipeline>()
                .ok_or_else(|| VideoError::DecoderInit("playbin is not a pipeline".into()))?;
            let clock = gst_net::NetClientClock::new(
                None,
                address,
                i32::from(params.sync_port),
                gst::ClockTime::ZERO,
            );
            pipeline.use_clock(Some(&clock));
            pipeline.set_base_time(gst::ClockTime::ZERO);
            pipeline.set_start_time(gst::ClockTime::NONE);
            info!(pipeline = %self.name, "using network clock {address}:{}", params.sync_port);
        }

        if let Err(e) = self.preroll(&mut loaded, params, crop.as_ref(), held_error) {
            loaded.shutdown();
            return Err(e);
        }
        Ok(loaded)
    }

    fn preroll(
        &self,
        loaded: &mut Loaded,
        params: &SetupParams,
        crop: Option<&gst::Element>,
        held_error: &Mutex<Option<String>>,
    ) -> Result<(), VideoError> {
        let opened = loaded
            .playbin
            .set_state(gst::State::Paused)
            .is_ok()
            && loaded.playbin.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS)).0.is_ok();
        if !opened {
            let reason = held_error
                .lock()
                .take()
                .unwrap_or_else(|| "preroll did not complete".to_string());
            return Err(VideoError::OpenFailed(format!("{}: {reason}", params.uri)));
        }

        let n_video = loaded.playbin.property::<i32>("n-video");
        let n_audio = loaded.playbin.property::<i32>("n-audio");
        for (kind, index, available) in [
            ("video", params.video_index, n_video),
            ("audio", params.audio_index, n_audio),
        ] {
            if index >= available {
                return Err(VideoError::UnsupportedFormat(format!(
                    "{kind} index {index} out of range ({available} streams)"
                )));
            }
            if index >= 0 {
                loaded.playbin.set_property(&format!("current-{kind}"), index);
            }
        }

        if let (Some(crop), false) = (crop, params.crop.is_empty()) {
            let input = crop
                .static_pad("sink")
                .and_then(|pad| pad.current_caps())
                .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok());
            match input {
                Some(info) => {
                    let (left, top, right, bottom) =
                        params.crop.to_pixels(info.width(), info.height());
                    crop.set_property("left", left as i32);
                    crop.set_property("top", top as i32);
                    crop.set_property("right", right as i32);
                    crop.set_property("bottom", bottom as i32);
                    // Re-preroll so the first frame already has the crop applied
                    if let Err(e) = loaded
                        .playbin
                        .seek_simple(gst::SeekFlags::FLUSH, gst::ClockTime::ZERO)
                    {
                        warn!(pipeline = %self.name, "crop re-preroll seek failed: {e}");
                    }
                    let (result, current, _) = loaded
                        .playbin
                        .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
                    if let Err(e) = result {
                        warn!(pipeline = %self.name, ?current, "crop re-preroll did not settle: {e}");
                    }
                }
                None => warn!(pipeline = %self.name, "no video caps after preroll; crop ignored"),
            }
        }

        if let Some(appsink) = &loaded.appsink {
            loaded.pending = appsink.try_pull_preroll(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        }
        Ok(())
    }
}

impl NativeSession for GstSession {
    fn setup(&mut self, params: &SetupParams) -> Result<(), VideoError> {
        if self.loaded.is_some() {
            return Err(VideoError::Generic(format!(
                "{}: setup on an open session",
                self.name
            )));
        }
        let held_error = Arc::new(Mutex::new(None));
        let armed = Arc::new(AtomicBool::new(false));
        let loaded = self.open(params, &held_error, &armed)?;
        armed.store(true, Ordering::Release);
        debug!(pipeline = %self.name, uri = %params.uri, "prerolled");
        self.loaded = Some(loaded);
        Ok(())
    }

    fn play(&mut self) -> Result<(), VideoError> {
        self.set_state(gst::State::Playing)
    }

    fn pause(&mut self) -> Result<(), VideoError> {
        self.set_state(gst::State::Paused)
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        self.set_state(gst::State::Paused)?;
        self.seek(Duration::ZERO)
    }

    fn close(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            loaded.shutdown();
        }
    }

    fn destroy(&mut self) {
        self.close();
    }

    fn duration(&self) -> Option<Duration> {
        let loaded = self.loaded.as_ref()?;
        loaded
            .playbin
            .query_duration::<gst::ClockTime>()
            .map(|d| Duration::from_nanos(d.nseconds()))
    }

    fn position(&self) -> Duration {
        self.loaded
            .as_ref()
            .and_then(|l| l.playbin.query_position::<gst::ClockTime>())
            .map_or(Duration::ZERO, |p| Duration::from_nanos(p.nseconds()))
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        let loaded = self.loaded()?;
        loaded
            .playbin
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::from_nseconds(position.as_nanos() as u64),
            )
            .map_err(|e| VideoError::SeekFailed(format!("{e}")))?;
        loaded.pending = None;
        loaded.want_preroll = true;
        Ok(())
    }

    fn grab_frame(&mut self) -> Option<FrameDescriptor> {
        let loaded = self.loaded.as_mut()?;
        let appsink = loaded.appsink.as_ref()?;

        let sample = match loaded.pending.take() {
            Some(sample) => Some(sample),
            None => {
                let pulled = appsink.try_pull_sample(gst::ClockTime::ZERO);
                if pulled.is_none() && loaded.want_preroll {
                    appsink.try_pull_preroll(gst::ClockTime::ZERO)
                } else {
                    pulled
                }
            }
        }?;
        loaded.want_preroll = false;

        let (width, height) = sample_size(&sample)?;
        loaded.ready = Some(sample);
        FrameDescriptor::new(width, height)
    }

    fn blit(&mut self, dest: &mut [u8], width: u32, height: u32) -> Result<(), VideoError> {
        let loaded = self.loaded()?;
        let sample = loaded
            .ready
            .as_ref()
            .ok_or_else(|| VideoError::DecodeFailed("no frame ready".into()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| VideoError::DecodeFailed("sample has no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| VideoError::DecodeFailed("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| VideoError::DecodeFailed(format!("bad video caps: {e}")))?;
        if (info.width(), info.height()) != (width, height) {
            return Err(VideoError::DecodeFailed(format!(
                "frame is {}x{}, asked for {width}x{height}",
                info.width(),
                info.height()
            )));
        }

        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
            .map_err(|e| VideoError::DecodeFailed(format!("cannot map frame: {e}")))?;
        let stride = frame.plane_stride()[0] as usize;
        let data = frame
            .plane_data(0)
            .map_err(|e| VideoError::DecodeFailed(format!("cannot read plane: {e}")))?;

        // appsink rows are padded to the stride; the destination is tight
        let row = width as usize * 3;
        if dest.len() != row * height as usize {
            return Err(VideoError::DecodeFailed(format!(
                "destination holds {} bytes",
                dest.len()
            )));
        }
        for (y, dst_row) in dest.chunks_exact_mut(row).enumerate() {
            let start = y * stride;
            let src_row = data
                .get(start..start + row)
                .ok_or_else(|| VideoError::DecodeFailed("short video plane".into()))?;
            dst_row.copy_from_slice(src_row);
        }
        Ok(())
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        self.close();
    }
}
