use livepeek_core::{CapturedFrame, PcmBuffer};

/// Render surface showing the most recent frame. Fire-and-forget.
pub trait PreviewSink: Send + Sync {
    fn update_frame(&self, frame: &CapturedFrame);
}

/// Consumer of the audio path (level metering).
///
/// Runs on the backend's audio delivery thread.
pub trait AudioSink: Send + Sync {
    fn process_pcm(&self, buffer: PcmBuffer);
}
