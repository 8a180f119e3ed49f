//! GStreamer capture backend (`gst` feature).
//!
//! Each catalog display is backed by a GStreamer source fragment, e.g.
//! `videotestsrc is-live=true pattern=ball` or
//! `pipewiresrc fd=12 path=44 do-timestamp=true`.
//!
//! # Pipelines
//!
//! ```text
//! <source> ! videoconvert ! videoscale ! capsfilter name=caps ! appsink name=sink
//!                                            ▲ caps replaced on update_configuration
//!
//! <audio source> ! audioconvert ! audioresample
//!   ! audio/x-raw,format=F32LE,layout=non-interleaved ! appsink name=sink
//! ```
//!
//! `appsink` callbacks run on GStreamer streaming threads and feed the
//! [`StreamDelegate`] directly. A bus watcher thread reports pipeline errors
//! and EOS as a terminal error. Windows are not capturable; a live pipeline
//! cannot be pointed at another display (the update is rejected).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use livepeek_core::{
    frame_attachments, AudioStreamDescription, CaptureError, ContentFilter, Display, FrameStatus,
    MediaType, Rect, SampleBuffer, StreamConfiguration, StreamHandle, SurfaceHandle,
    TargetCatalog,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{CaptureBackend, StreamDelegate};

const AUDIO_RATE: i32 = 48_000;
const AUDIO_CHANNELS: i32 = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// A display whose content comes from a GStreamer source fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GstSource {
    pub display: Display,
    pub launch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GstCatalog {
    pub sources: Vec<GstSource>,
    pub audio_launch: String,
}

impl Default for GstCatalog {
    fn default() -> Self {
        Self {
            sources: vec![GstSource {
                display: Display { id: livepeek_core::DisplayId(1), width: 1280, height: 720 },
                launch: "videotestsrc is-live=true pattern=ball".into(),
            }],
            audio_launch: "audiotestsrc is-live=true wave=sine volume=0.25".into(),
        }
    }
}

// ── Open stream state ─────────────────────────────────────────────────────────

struct OpenStream {
    display: Display,
    video: gst::Pipeline,
    caps_filter: gst::Element,
    audio: Option<gst::Pipeline>,
    delegate: Arc<dyn StreamDelegate>,
    stop: Arc<AtomicBool>,
}

impl OpenStream {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.video.set_state(gst::State::Null);
        if let Some(audio) = self.audio.take() {
            let _ = audio.set_state(gst::State::Null);
        }
    }
}

// ── GstBackend ────────────────────────────────────────────────────────────────

pub struct GstBackend {
    catalog: GstCatalog,
    streams: Mutex<HashMap<StreamHandle, OpenStream>>,
    next_stream: AtomicU64,
    next_surface: Arc<AtomicU64>,
}

impl GstBackend {
    pub fn new(catalog: GstCatalog) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::PermissionDenied { reason: format!("GStreamer init: {e}") })?;
        info!("GStreamer backend ready with {} source(s)", catalog.sources.len());
        Ok(Self {
            catalog,
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU64::new(1),
            next_surface: Arc::new(AtomicU64::new(1)),
        })
    }

    fn source_for(&self, filter: &ContentFilter) -> Result<&GstSource, CaptureError> {
        match filter {
            ContentFilter::Display { display, .. } => self
                .catalog
                .sources
                .iter()
                .find(|source| source.display.id == display.id)
                .ok_or_else(|| CaptureError::start_failure(format!("no source for {}", display.label()))),
            ContentFilter::Window { window } => Err(CaptureError::start_failure(format!(
                "window capture is not supported by the GStreamer backend ({})",
                window.label()
            ))),
        }
    }

    fn build_video(
        &self,
        source: &GstSource,
        config: &StreamConfiguration,
        delegate: Arc<dyn StreamDelegate>,
    ) -> Result<(gst::Pipeline, gst::Element), CaptureError> {
        let desc = format!(
            "{} ! videoconvert ! videoscale ! capsfilter name=caps \
             ! appsink name=sink max-buffers={} drop=true sync=false emit-signals=false",
            source.launch,
            config.queue_depth.max(1)
        );
        debug!("GStreamer video pipeline: {}", desc);

        let pipeline = parse_pipeline(&desc)?;
        let caps_filter = pipeline
            .by_name("caps")
            .ok_or_else(|| CaptureError::start_failure("no capsfilter 'caps'"))?;
        caps_filter.set_property("caps", &video_caps(config, &source.display));

        let appsink = app_sink(&pipeline)?;
        let display = source.display.clone();
        let surfaces = Arc::clone(&self.next_surface);
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match video_sample(&sample, &display, &surfaces) {
                        Some(buffer) => delegate.did_output_sample(buffer, MediaType::Video),
                        None => tracing::trace!("GStreamer video sample without caps/buffer"),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        Ok((pipeline, caps_filter))
    }

    fn build_audio(&self, delegate: Arc<dyn StreamDelegate>) -> Result<gst::Pipeline, CaptureError> {
        let desc = format!(
            "{} ! audioconvert ! audioresample \
             ! audio/x-raw,format=F32LE,layout=non-interleaved,rate={AUDIO_RATE},channels={AUDIO_CHANNELS} \
             ! appsink name=sink max-buffers=8 drop=true sync=false emit-signals=false",
            self.catalog.audio_launch
        );
        debug!("GStreamer audio pipeline: {}", desc);

        let pipeline = parse_pipeline(&desc)?;
        let appsink = app_sink(&pipeline)?;
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(buffer) = audio_sample(&sample) {
                        delegate.did_output_sample(buffer, MediaType::Audio);
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        Ok(pipeline)
    }

    fn start_audio(&self, stream: &mut OpenStream) -> Result<(), CaptureError> {
        let audio = self.build_audio(Arc::clone(&stream.delegate))?;
        audio
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::rejected(format!("audio pipeline: {e}")))?;
        stream.audio = Some(audio);
        Ok(())
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        for stream in lock(&self.streams).values_mut() {
            stream.shutdown();
        }
    }
}

#[async_trait]
impl CaptureBackend for GstBackend {
    async fn enumerate_targets(&self) -> Result<TargetCatalog, CaptureError> {
        Ok(TargetCatalog {
            displays: self.catalog.sources.iter().map(|source| source.display.clone()).collect(),
            ..Default::default()
        })
    }

    async fn open_stream(
        &self,
        config: &StreamConfiguration,
        filter: &ContentFilter,
        delegate: Arc<dyn StreamDelegate>,
    ) -> Result<StreamHandle, CaptureError> {
        let source = self.source_for(filter)?;
        let (video, caps_filter) = self.build_video(source, config, Arc::clone(&delegate))?;
        let handle = StreamHandle(self.next_stream.fetch_add(1, Ordering::Relaxed));
        let stop = Arc::new(AtomicBool::new(false));

        let mut stream = OpenStream {
            display: source.display.clone(),
            video,
            caps_filter,
            audio: None,
            delegate: Arc::clone(&delegate),
            stop: Arc::clone(&stop),
        };

        if let Err(e) = stream.video.set_state(gst::State::Playing) {
            stream.shutdown();
            return Err(CaptureError::start_failure(format!("GStreamer set Playing: {e}")));
        }
        if config.captures_audio {
            if let Err(e) = self.start_audio(&mut stream) {
                warn!("{} audio unavailable: {}", handle, e);
            }
        }

        if let Some(bus) = stream.video.bus() {
            let watcher = thread::Builder::new()
                .name(format!("livepeek-gst-bus-{}", handle.0))
                .spawn(move || watch_bus(bus, stop, delegate));
            if let Err(e) = watcher {
                stream.shutdown();
                return Err(CaptureError::start_failure(format!("bus watcher: {e}")));
            }
        }

        info!("GStreamer {} playing: {}", handle, source.display.label());
        lock(&self.streams).insert(handle, stream);
        Ok(handle)
    }

    async fn update_configuration(
        &self,
        handle: StreamHandle,
        config: &StreamConfiguration,
    ) -> Result<(), CaptureError> {
        let mut streams = lock(&self.streams);
        let stream = streams
            .get_mut(&handle)
            .ok_or_else(|| CaptureError::rejected(format!("{handle} is not open")))?;

        stream.caps_filter.set_property("caps", &video_caps(config, &stream.display));

        match (config.captures_audio, stream.audio.is_some()) {
            (true, false) => self.start_audio(stream)?,
            (false, true) => {
                if let Some(audio) = stream.audio.take() {
                    let _ = audio.set_state(gst::State::Null);
                }
            }
            _ => {}
        }
        debug!("GStreamer {} caps updated: {}x{}", handle, config.width, config.height);
        Ok(())
    }

    async fn update_filter(&self, handle: StreamHandle, filter: &ContentFilter) -> Result<(), CaptureError> {
        let streams = lock(&self.streams);
        let stream = streams
            .get(&handle)
            .ok_or_else(|| CaptureError::rejected(format!("{handle} is not open")))?;
        match filter {
            ContentFilter::Display { display, .. } if display.id == stream.display.id => Ok(()),
            other => Err(CaptureError::rejected(format!(
                "cannot retarget {} from {} to {}",
                handle,
                stream.display.label(),
                other.label()
            ))),
        }
    }

    async fn stop(&self, handle: StreamHandle) -> Result<(), CaptureError> {
        let mut stream = lock(&self.streams)
            .remove(&handle)
            .ok_or_else(|| CaptureError::terminated(format!("{handle} was not running")))?;
        stream.shutdown();
        info!("GStreamer {} stopped", handle);
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_pipeline(desc: &str) -> Result<gst::Pipeline, CaptureError> {
    gst::parse::launch(desc)
        .map_err(|e| CaptureError::start_failure(format!("parsing GStreamer pipeline: {e}")))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| CaptureError::start_failure("expected Pipeline element"))
}

fn app_sink(pipeline: &gst::Pipeline) -> Result<AppSink, CaptureError> {
    pipeline
        .by_name("sink")
        .and_then(|element| element.downcast::<AppSink>().ok())
        .ok_or_else(|| CaptureError::start_failure("no appsink 'sink'"))
}

fn video_caps(config: &StreamConfiguration, display: &Display) -> gst::Caps {
    let (width, height) = if config.width > 0 && config.height > 0 {
        (config.width, config.height)
    } else {
        (display.width, display.height)
    };
    let fps = if config.minimum_frame_interval.is_zero() {
        60
    } else {
        (1.0 / config.minimum_frame_interval.as_secs_f64()).round().clamp(1.0, 240.0) as i32
    };
    gst::Caps::builder("video/x-raw")
        .field("format", "BGRx")
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", gst::Fraction::new(fps, 1))
        .build()
}

fn video_sample(sample: &gst::Sample, display: &Display, surfaces: &AtomicU64) -> Option<SampleBuffer> {
    let info = gstreamer_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let buffer = sample.buffer()?;
    let pts = buffer.pts().map(|t| Duration::from_nanos(t.nseconds())).unwrap_or_default();
    let map = buffer.map_readable().ok()?;

    let surface = SurfaceHandle::new(
        surfaces.fetch_add(1, Ordering::Relaxed),
        info.width(),
        info.height(),
        info.stride().first().copied().unwrap_or_default().max(0) as u32,
        Bytes::copy_from_slice(map.as_slice()),
    );
    let rect = Rect::new(0.0, 0.0, f64::from(display.width), f64::from(display.height));
    let scale_factor = f64::from(info.width()) / f64::from(display.width.max(1));
    Some(SampleBuffer::video(
        pts,
        Some(surface),
        frame_attachments(FrameStatus::Complete, rect, 1.0, scale_factor),
    ))
}

fn audio_sample(sample: &gst::Sample) -> Option<SampleBuffer> {
    let structure = sample.caps()?.structure(0)?;
    let rate = structure.get::<i32>("rate").ok()?;
    let channels = structure.get::<i32>("channels").ok()?.max(0) as usize;
    let buffer = sample.buffer()?;
    let pts = buffer.pts().map(|t| Duration::from_nanos(t.nseconds())).unwrap_or_default();
    let map = buffer.map_readable().ok()?;

    // Non-interleaved: planes are laid out back to back.
    let storage = Bytes::copy_from_slice(map.as_slice());
    let plane = if channels == 0 { 0 } else { storage.len() / channels };
    let planes = (0..channels).map(|i| storage.slice(i * plane..(i + 1) * plane)).collect();

    Some(SampleBuffer::audio(
        pts,
        AudioStreamDescription::float32_planar(f64::from(rate), channels as u32),
        planes,
    ))
}

fn watch_bus(bus: gst::Bus, stop: Arc<AtomicBool>, delegate: Arc<dyn StreamDelegate>) {
    while !stop.load(Ordering::Acquire) {
        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(250)) else { continue };
        match msg.view() {
            gst::MessageView::Eos(_) => {
                info!("GStreamer pipeline EOS");
                delegate.did_stop_with_error(CaptureError::terminated("end of stream"));
                break;
            }
            gst::MessageView::Error(e) => {
                error!("GStreamer error: {}", e.error());
                delegate.did_stop_with_error(CaptureError::terminated(e.error().to_string()));
                break;
            }
            _ => {}
        }
    }
}
