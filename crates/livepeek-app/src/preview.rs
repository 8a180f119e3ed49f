//! Headless stand-in for the preview layer: counts frames and logs the
//! content size and frame rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use livepeek_capture::PreviewSink;
use livepeek_core::{CapturedFrame, Size};
use tracing::{debug, info};

/// Frames between periodic "presenting" log lines.
const LOG_EVERY: u64 = 300;

pub struct LoggingPreview {
    presented: AtomicU64,
    fps: Mutex<FpsCounter>,
    last_size: Mutex<Size>,
}

impl LoggingPreview {
    pub fn new() -> Self {
        Self {
            presented: AtomicU64::new(0),
            fps: Mutex::new(FpsCounter::new()),
            last_size: Mutex::new(Size::ZERO),
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f32 {
        self.fps.lock().unwrap_or_else(PoisonError::into_inner).fps()
    }
}

impl PreviewSink for LoggingPreview {
    fn update_frame(&self, frame: &CapturedFrame) {
        let n = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        self.fps.lock().unwrap_or_else(PoisonError::into_inner).tick();

        let size = frame.size();
        let mut last = self.last_size.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != size {
            debug!("Preview layer resized to {} (scale {})", size, frame.scale_factor);
            *last = size;
        }
        if n % LOG_EVERY == 0 {
            info!("Presented {} frames, content {}", n, size);
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

struct FpsCounter {
    count: u32,
    window_start: Instant,
    last_fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self { count: 0, window_start: Instant::now(), last_fps: 0.0 }
    }

    fn tick(&mut self) {
        self.count += 1;
    }

    /// Rate over the window since the previous call of at least 0.5 s.
    fn fps(&mut self) -> f32 {
        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed >= 0.5 {
            self.last_fps = self.count as f32 / elapsed;
            self.count = 0;
            self.window_start = Instant::now();
        }
        self.last_fps
    }
}
