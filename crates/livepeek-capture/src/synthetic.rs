//! In-process capture backend.
//!
//! Each open stream owns two OS threads, mirroring the separate video and
//! audio delivery queues of a platform capture service:
//!
//! ```text
//! livepeek-video-N ── every frame interval ──► delegate (Video)
//!                      every 10th frame reports Idle status
//! livepeek-audio-N ── every 10 ms, if audio enabled ──► delegate (Audio)
//! ```
//!
//! Configuration and filter updates are picked up by the threads on their
//! next iteration. [`SyntheticBackend::fail_stream`] makes the video thread
//! report a terminal error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use livepeek_core::{
    f32_bytes, frame_attachments, AudioStreamDescription, CaptureError, ContentFilter, Display,
    DisplayId, FrameStatus, MediaType, Rect, RunningApplication, SampleBuffer,
    StreamConfiguration, StreamHandle, SurfaceHandle, TargetCatalog, Window, WindowId,
};
use tracing::{debug, info};

use crate::backend::{CaptureBackend, StreamDelegate};

const AUDIO_SAMPLE_RATE: f64 = 48_000.0;
const AUDIO_CHANNELS: u32 = 2;
const AUDIO_CHUNK: Duration = Duration::from_millis(10);
const TONE_HZ: f64 = 440.0;
/// Every Nth video sample carries `Idle` status.
const IDLE_EVERY: u64 = 10;
/// Largest generated surface edge, in pixels.
const MAX_SURFACE_EDGE: u32 = 8_192;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Per-stream control block ──────────────────────────────────────────────────

struct StreamControl {
    stop: AtomicBool,
    config: Mutex<StreamConfiguration>,
    filter: Mutex<ContentFilter>,
    failure: Mutex<Option<String>>,
}

impl StreamControl {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

// ── SyntheticBackend ──────────────────────────────────────────────────────────

pub struct SyntheticBackend {
    catalog: TargetCatalog,
    streams: Mutex<HashMap<StreamHandle, Arc<StreamControl>>>,
    next_stream: AtomicU64,
    next_surface: Arc<AtomicU64>,
    permission_granted: AtomicBool,
}

impl SyntheticBackend {
    pub fn new(catalog: TargetCatalog) -> Self {
        Self {
            catalog,
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU64::new(1),
            next_surface: Arc::new(AtomicU64::new(1)),
            permission_granted: AtomicBool::new(true),
        }
    }

    /// Two displays, three application windows.
    pub fn demo_catalog() -> TargetCatalog {
        let app = |pid: i32, bundle: &str, name: &str| RunningApplication {
            process_id: pid,
            bundle_identifier: bundle.to_owned(),
            application_name: name.to_owned(),
        };
        let terminal = app(301, "com.apple.Terminal", "Terminal");
        let editor = app(302, "dev.zed.Zed", "Zed");
        let preview = app(303, "dev.livepeek.app", "LivePeek");

        let window = |id: u32, title: &str, w: f64, h: f64, owner: &RunningApplication| Window {
            id: WindowId(id),
            title: Some(title.to_owned()),
            frame: Rect::new(40.0, 40.0, w, h),
            owning_application: Some(owner.clone()),
            is_on_screen: true,
        };

        TargetCatalog {
            displays: vec![
                Display { id: DisplayId(1), width: 1512, height: 982 },
                Display { id: DisplayId(2), width: 2560, height: 1440 },
            ],
            windows: vec![
                window(101, "zsh", 800.0, 500.0, &terminal),
                window(102, "main.rs", 1200.0, 800.0, &editor),
                window(103, "LivePeek", 640.0, 480.0, &preview),
            ],
            applications: vec![terminal, editor, preview],
        }
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::Release);
    }

    /// Makes `handle` report a terminal error on its next video tick.
    pub fn fail_stream(&self, handle: StreamHandle, reason: impl Into<String>) -> bool {
        match lock(&self.streams).get(&handle) {
            Some(control) => {
                *lock(&control.failure) = Some(reason.into());
                true
            }
            None => false,
        }
    }

    pub fn active_streams(&self) -> Vec<StreamHandle> {
        lock(&self.streams).keys().copied().collect()
    }

    fn control(&self, handle: StreamHandle) -> Result<Arc<StreamControl>, CaptureError> {
        lock(&self.streams)
            .get(&handle)
            .cloned()
            .ok_or_else(|| CaptureError::rejected(format!("{handle} is not open")))
    }

    fn target_available(&self, filter: &ContentFilter) -> bool {
        let catalog = &self.catalog;
        match filter {
            ContentFilter::Display { display, .. } => catalog.display(display.id).is_some(),
            ContentFilter::Window { window } => catalog.window(window.id).is_some(),
        }
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        for control in lock(&self.streams).values() {
            control.stop.store(true, Ordering::Release);
        }
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    async fn enumerate_targets(&self) -> Result<TargetCatalog, CaptureError> {
        if !self.permission_granted.load(Ordering::Acquire) {
            return Err(CaptureError::PermissionDenied { reason: "screen recording not authorised".into() });
        }
        Ok(self.catalog.clone())
    }

    async fn open_stream(
        &self,
        config: &StreamConfiguration,
        filter: &ContentFilter,
        delegate: Arc<dyn StreamDelegate>,
    ) -> Result<StreamHandle, CaptureError> {
        if !self.target_available(filter) {
            return Err(CaptureError::start_failure(format!("{} is no longer available", filter.label())));
        }

        let handle = StreamHandle(self.next_stream.fetch_add(1, Ordering::Relaxed));
        let control = Arc::new(StreamControl {
            stop: AtomicBool::new(false),
            config: Mutex::new(config.clone()),
            filter: Mutex::new(filter.clone()),
            failure: Mutex::new(None),
        });

        let video = {
            let control = Arc::clone(&control);
            let delegate = Arc::clone(&delegate);
            let surfaces = Arc::clone(&self.next_surface);
            thread::Builder::new()
                .name(format!("livepeek-video-{}", handle.0))
                .spawn(move || video_loop(control, delegate, surfaces))
        };
        if let Err(e) = video {
            return Err(CaptureError::start_failure(format!("video thread: {e}")));
        }

        let audio = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name(format!("livepeek-audio-{}", handle.0))
                .spawn(move || audio_loop(control, delegate))
        };
        if let Err(e) = audio {
            control.stop.store(true, Ordering::Release);
            return Err(CaptureError::start_failure(format!("audio thread: {e}")));
        }

        info!("Synthetic {} opened: {} ({}x{})", handle, filter.label(), config.width, config.height);
        lock(&self.streams).insert(handle, control);
        Ok(handle)
    }

    async fn update_configuration(
        &self,
        handle: StreamHandle,
        config: &StreamConfiguration,
    ) -> Result<(), CaptureError> {
        let control = self.control(handle)?;
        *lock(&control.config) = config.clone();
        debug!("Synthetic {} configuration updated: {}x{}", handle, config.width, config.height);
        Ok(())
    }

    async fn update_filter(&self, handle: StreamHandle, filter: &ContentFilter) -> Result<(), CaptureError> {
        let control = self.control(handle)?;
        if !self.target_available(filter) {
            return Err(CaptureError::rejected(format!("{} is no longer available", filter.label())));
        }
        *lock(&control.filter) = filter.clone();
        debug!("Synthetic {} filter updated: {}", handle, filter.label());
        Ok(())
    }

    async fn stop(&self, handle: StreamHandle) -> Result<(), CaptureError> {
        let control = lock(&self.streams)
            .remove(&handle)
            .ok_or_else(|| CaptureError::terminated(format!("{handle} was not running")))?;
        control.stop.store(true, Ordering::Release);
        info!("Synthetic {} stopped", handle);
        Ok(())
    }
}

// ── Delivery threads ──────────────────────────────────────────────────────────

/// Content rect (points) and pixel size of what `filter` shows under `config`.
fn geometry(config: &StreamConfiguration, filter: &ContentFilter) -> (Rect, u32, u32) {
    let (w_pt, h_pt) = match filter {
        ContentFilter::Display { display, .. } => (f64::from(display.width), f64::from(display.height)),
        ContentFilter::Window { window } => (window.frame.width(), window.frame.height()),
    };
    let px_w = if config.width > 0 { config.width } else { w_pt.max(1.0) as u32 };
    let px_h = if config.height > 0 { config.height } else { h_pt.max(1.0) as u32 };
    let (px_w, px_h) = (px_w.min(MAX_SURFACE_EDGE), px_h.min(MAX_SURFACE_EDGE));
    (Rect::new(0.0, 0.0, w_pt, h_pt), px_w, px_h)
}

fn video_loop(control: Arc<StreamControl>, delegate: Arc<dyn StreamDelegate>, surfaces: Arc<AtomicU64>) {
    let started = Instant::now();
    let mut tick: u64 = 0;
    // One shared pixel store per output size; frames only bump a refcount.
    let mut pixels: Option<(u32, u32, Bytes)> = None;

    while !control.stopped() {
        if let Some(reason) = lock(&control.failure).take() {
            delegate.did_stop_with_error(CaptureError::terminated(reason));
            return;
        }

        let config = lock(&control.config).clone();
        let filter = lock(&control.filter).clone();
        let (rect, px_w, px_h) = geometry(&config, &filter);

        let reuse = matches!(&pixels, Some((w, h, _)) if *w == px_w && *h == px_h);
        if !reuse {
            pixels = Some((px_w, px_h, Bytes::from(vec![0x80u8; px_w as usize * px_h as usize * 4])));
        }
        let store = pixels.as_ref().map(|(_, _, bytes)| bytes.clone()).unwrap_or_default();

        tick += 1;
        let status = if tick % IDLE_EVERY == 0 { FrameStatus::Idle } else { FrameStatus::Complete };
        let surface = SurfaceHandle::new(surfaces.fetch_add(1, Ordering::Relaxed), px_w, px_h, px_w * 4, store);
        let scale_factor = f64::from(px_w) / rect.width().max(1.0);
        let sample = SampleBuffer::video(
            started.elapsed(),
            Some(surface),
            frame_attachments(status, rect, 1.0, scale_factor),
        );
        delegate.did_output_sample(sample, MediaType::Video);

        thread::sleep(config.minimum_frame_interval);
    }
}

fn audio_loop(control: Arc<StreamControl>, delegate: Arc<dyn StreamDelegate>) {
    let started = Instant::now();
    let frames_per_chunk = (AUDIO_SAMPLE_RATE * AUDIO_CHUNK.as_secs_f64()) as usize;
    let mut phase = 0.0f64;
    let step = 2.0 * std::f64::consts::PI * TONE_HZ / AUDIO_SAMPLE_RATE;

    while !control.stopped() {
        if lock(&control.config).captures_audio {
            let tone: Vec<f32> = (0..frames_per_chunk)
                .map(|i| (0.25 * (phase + step * i as f64).sin()) as f32)
                .collect();
            phase = (phase + step * frames_per_chunk as f64) % (2.0 * std::f64::consts::PI);

            let channel = f32_bytes(&tone);
            let buffers = (0..AUDIO_CHANNELS).map(|_| channel.clone()).collect();
            let sample = SampleBuffer::audio(
                started.elapsed(),
                AudioStreamDescription::float32_planar(AUDIO_SAMPLE_RATE, AUDIO_CHANNELS),
                buffers,
            );
            delegate.did_output_sample(sample, MediaType::Audio);
        }
        thread::sleep(AUDIO_CHUNK);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bridge::frame_channel;
    use crate::meter::PowerMeter;
    use crate::output::CaptureStreamOutput;
    use crate::sink::AudioSink;

    fn display_filter(catalog: &TargetCatalog) -> ContentFilter {
        ContentFilter::Display {
            display: catalog.displays[0].clone(),
            excluded_applications: vec![],
            excluded_windows: vec![],
        }
    }

    fn fast_config() -> StreamConfiguration {
        StreamConfiguration {
            width: 64,
            height: 40,
            minimum_frame_interval: Duration::from_millis(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delivers_frames_until_stopped() {
        let catalog = SyntheticBackend::demo_catalog();
        let backend = SyntheticBackend::new(catalog.clone());
        let (producer, mut stream) = frame_channel();
        let output = Arc::new(CaptureStreamOutput::new(producer.clone(), None));

        let handle = backend
            .open_stream(&fast_config(), &display_filter(&catalog), output)
            .await
            .expect("stream opens");

        let frame = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame within timeout")
            .expect("sequence open")
            .expect("no failure");
        assert_eq!(frame.size().width, 1512.0);
        assert_eq!(frame.surface.as_ref().map(SurfaceHandle::width), Some(64));

        backend.stop(handle).await.expect("stop");
        assert!(backend.active_streams().is_empty());
        assert!(backend.stop(handle).await.is_err());
        producer.finish(Ok(()));
    }

    #[tokio::test]
    async fn injected_failure_terminates_sequence() {
        let catalog = SyntheticBackend::demo_catalog();
        let backend = SyntheticBackend::new(catalog.clone());
        let (producer, mut stream) = frame_channel();
        let output = Arc::new(CaptureStreamOutput::new(producer, None));
        let handle = backend
            .open_stream(&fast_config(), &display_filter(&catalog), output)
            .await
            .expect("stream opens");

        assert!(backend.fail_stream(handle, "display disconnected"));
        let outcome = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match stream.next().await {
                    Some(Ok(_)) => continue,
                    other => break other,
                }
            }
        })
        .await
        .expect("termination within timeout");
        assert_eq!(outcome, Some(Err(CaptureError::terminated("display disconnected"))));
    }

    #[tokio::test]
    async fn audio_flows_only_when_enabled() {
        let catalog = SyntheticBackend::demo_catalog();
        let backend = SyntheticBackend::new(catalog.clone());
        let meter = Arc::new(PowerMeter::new());
        let (producer, _stream) = frame_channel();
        let output = Arc::new(CaptureStreamOutput::new(producer, Some(meter.clone() as Arc<dyn AudioSink>)));
        let handle = backend
            .open_stream(&fast_config(), &display_filter(&catalog), output)
            .await
            .expect("stream opens");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(meter.buffers_processed(), 0);

        let config = StreamConfiguration { captures_audio: true, ..fast_config() };
        backend.update_configuration(handle, &config).await.expect("live update");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(meter.buffers_processed() > 0);
        assert!(meter.levels().peak_power_db > -13.0);

        backend.stop(handle).await.expect("stop");
    }

    #[tokio::test]
    async fn unknown_targets_are_refused() {
        let backend = SyntheticBackend::new(TargetCatalog::default());
        let filter = display_filter(&SyntheticBackend::demo_catalog());
        let (producer, _stream) = frame_channel();
        let output = Arc::new(CaptureStreamOutput::new(producer, None));

        let err = backend.open_stream(&fast_config(), &filter, output).await.unwrap_err();
        assert!(matches!(err, CaptureError::StartFailure { .. }));
    }

    #[test]
    fn oversized_configuration_is_clamped() {
        let filter = display_filter(&SyntheticBackend::demo_catalog());
        let config = StreamConfiguration { width: u32::MAX, height: 4_000_000_000, ..Default::default() };
        let (rect, px_w, px_h) = geometry(&config, &filter);
        assert_eq!((px_w, px_h), (MAX_SURFACE_EDGE, MAX_SURFACE_EDGE));
        assert_eq!(rect.size, livepeek_core::Size::new(1512.0, 982.0));

        let (_, px_w, px_h) = geometry(&fast_config(), &filter);
        assert_eq!((px_w, px_h), (64, 40));
    }
}
