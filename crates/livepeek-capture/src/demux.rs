//! Classifies raw samples and turns them into frames or PCM buffers.
//!
//! Runs synchronously on whichever thread the backend delivers on. Anything
//! that does not validate is dropped without side effects.

use livepeek_core::{
    AttachmentKey, CaptureError, CapturedFrame, FrameStatus, MediaType, PcmBuffer, PcmFormat,
    SampleBuffer,
};
use tracing::trace;

pub type FrameHandler = Box<dyn Fn(CapturedFrame) + Send + Sync>;
pub type PcmHandler = Box<dyn Fn(PcmBuffer) + Send + Sync>;

#[derive(Default)]
pub struct SampleDemultiplexer {
    frame_handler: Option<FrameHandler>,
    pcm_handler: Option<PcmHandler>,
}

impl SampleDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame(mut self, handler: impl Fn(CapturedFrame) + Send + Sync + 'static) -> Self {
        self.frame_handler = Some(Box::new(handler));
        self
    }

    pub fn on_pcm(mut self, handler: impl Fn(PcmBuffer) + Send + Sync + 'static) -> Self {
        self.pcm_handler = Some(Box::new(handler));
        self
    }

    /// Routes one sample to the matching handler, or drops it.
    pub fn process(&self, sample: &SampleBuffer, kind: MediaType) {
        if !sample.is_valid {
            return;
        }
        match kind {
            MediaType::Video => match decode_frame(sample) {
                Ok(frame) => {
                    if let Some(handler) = &self.frame_handler {
                        handler(frame);
                    }
                }
                Err(e) => trace!("video sample dropped: {}", e),
            },
            MediaType::Audio => match decode_pcm(sample) {
                Ok(pcm) => {
                    if let Some(handler) = &self.pcm_handler {
                        handler(pcm);
                    }
                }
                Err(e) => trace!("audio sample dropped: {}", e),
            },
        }
    }
}

fn malformed(reason: impl Into<String>) -> CaptureError {
    CaptureError::MalformedSample { reason: reason.into() }
}

/// Builds a frame from a complete, surface-backed video sample.
pub fn decode_frame(sample: &SampleBuffer) -> Result<CapturedFrame, CaptureError> {
    if !sample.is_valid {
        return Err(malformed("sample buffer is invalid"));
    }
    let attachments = sample
        .first_attachments()
        .ok_or_else(|| malformed("no attachments"))?;

    let raw_status = attachments
        .get(&AttachmentKey::Status)
        .and_then(|value| value.as_integer())
        .ok_or_else(|| malformed("missing frame status"))?;
    let status = FrameStatus::from_raw(raw_status)
        .ok_or_else(|| malformed(format!("unknown frame status {raw_status}")))?;
    if status != FrameStatus::Complete {
        return Err(malformed(format!("frame status {status:?}")));
    }

    let surface = sample
        .image_buffer
        .as_ref()
        .ok_or_else(|| malformed("no image buffer"))?
        .surface
        .clone()
        .ok_or_else(|| malformed("image buffer is not surface-backed"))?;

    let content_rect = attachments
        .get(&AttachmentKey::ContentRect)
        .and_then(|value| value.as_rect())
        .ok_or_else(|| malformed("missing content rect"))?;
    let content_scale = attachments
        .get(&AttachmentKey::ContentScale)
        .and_then(|value| value.as_float())
        .ok_or_else(|| malformed("missing content scale"))?;
    let scale_factor = attachments
        .get(&AttachmentKey::ScaleFactor)
        .and_then(|value| value.as_float())
        .ok_or_else(|| malformed("missing scale factor"))?;

    Ok(CapturedFrame { surface: Some(surface), content_rect, content_scale, scale_factor })
}

/// Wraps an audio sample as standard-format PCM without copying.
pub fn decode_pcm(sample: &SampleBuffer) -> Result<PcmBuffer, CaptureError> {
    let description = sample
        .audio_format
        .ok_or_else(|| malformed("no audio stream description"))?;
    let format = PcmFormat::standard(description.sample_rate, description.channels_per_frame)
        .ok_or_else(|| {
            malformed(format!(
                "no standard format for {} Hz × {} ch",
                description.sample_rate, description.channels_per_frame
            ))
        })?;
    let list = sample
        .audio_buffers
        .as_ref()
        .ok_or_else(|| malformed("no audio buffer list"))?;
    PcmBuffer::wrap(format, list).ok_or_else(|| malformed("buffer list does not match format"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use livepeek_core::{
        f32_bytes, frame_attachments, AttachmentValue, AudioStreamDescription, Rect, Size,
        SurfaceHandle,
    };

    use super::*;

    fn surface() -> SurfaceHandle {
        SurfaceHandle::new(1, 64, 32, 256, Bytes::from(vec![0u8; 64 * 32 * 4]))
    }

    fn complete_sample(rect: Rect) -> SampleBuffer {
        SampleBuffer::video(
            Duration::ZERO,
            Some(surface()),
            frame_attachments(FrameStatus::Complete, rect, 1.0, 2.0),
        )
    }

    fn recording_demux() -> (SampleDemultiplexer, Arc<Mutex<Vec<CapturedFrame>>>, Arc<Mutex<Vec<PcmBuffer>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let pcm = Arc::new(Mutex::new(Vec::new()));
        let (f, p) = (Arc::clone(&frames), Arc::clone(&pcm));
        let demux = SampleDemultiplexer::new()
            .on_frame(move |frame| f.lock().unwrap().push(frame))
            .on_pcm(move |buffer| p.lock().unwrap().push(buffer));
        (demux, frames, pcm)
    }

    #[test]
    fn complete_frame_size_matches_content_rect() {
        let rect = Rect::new(10.0, 20.0, 1440.0, 900.0);
        let frame = decode_frame(&complete_sample(rect)).expect("well-formed sample");
        assert_eq!(frame.size(), Size::new(1440.0, 900.0));
        assert_eq!(frame.content_rect, rect);
        assert_eq!(frame.scale_factor, 2.0);
        assert!(frame.is_valid());
    }

    #[test]
    fn malformed_video_samples_emit_nothing() {
        let rect = Rect::new(0.0, 0.0, 800.0, 600.0);
        let mut cases = Vec::new();

        let mut no_status = complete_sample(rect);
        no_status.attachments[0].remove(&AttachmentKey::Status);
        cases.push(no_status);

        for status in [FrameStatus::Idle, FrameStatus::Blank, FrameStatus::Suspended, FrameStatus::Started, FrameStatus::Stopped] {
            cases.push(SampleBuffer::video(Duration::ZERO, Some(surface()), frame_attachments(status, rect, 1.0, 2.0)));
        }

        let mut bad_status_type = complete_sample(rect);
        bad_status_type.attachments[0].insert(AttachmentKey::Status, AttachmentValue::Float(0.0));
        cases.push(bad_status_type);

        let mut no_rect = complete_sample(rect);
        no_rect.attachments[0].remove(&AttachmentKey::ContentRect);
        cases.push(no_rect);

        let mut no_scale = complete_sample(rect);
        no_scale.attachments[0].remove(&AttachmentKey::ContentScale);
        cases.push(no_scale);

        let mut no_factor = complete_sample(rect);
        no_factor.attachments[0].remove(&AttachmentKey::ScaleFactor);
        cases.push(no_factor);

        let mut no_attachments = complete_sample(rect);
        no_attachments.attachments.clear();
        cases.push(no_attachments);

        let mut no_surface = complete_sample(rect);
        no_surface.image_buffer = None;
        cases.push(no_surface);

        let mut invalid = complete_sample(rect);
        invalid.is_valid = false;
        cases.push(invalid);

        let (demux, frames, _) = recording_demux();
        for sample in &cases {
            demux.process(sample, MediaType::Video);
        }
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn audio_routed_to_pcm_handler_only() {
        let (demux, frames, pcm) = recording_demux();
        let sample = SampleBuffer::audio(
            Duration::ZERO,
            AudioStreamDescription::float32_planar(48_000.0, 2),
            vec![f32_bytes(&[0.1; 480]), f32_bytes(&[0.2; 480])],
        );

        demux.process(&sample, MediaType::Audio);
        demux.process(&sample, MediaType::Video);

        assert!(frames.lock().unwrap().is_empty());
        let pcm = pcm.lock().unwrap();
        assert_eq!(pcm.len(), 1);
        assert_eq!(pcm[0].frame_length(), 480);
        assert_eq!(pcm[0].format().channel_count, 2);
    }

    #[test]
    fn audio_without_format_is_skipped() {
        let (demux, _, pcm) = recording_demux();

        let mut no_format = SampleBuffer::audio(
            Duration::ZERO,
            AudioStreamDescription::float32_planar(48_000.0, 1),
            vec![f32_bytes(&[0.0; 16])],
        );
        no_format.audio_format = None;
        demux.process(&no_format, MediaType::Audio);

        let zero_rate = SampleBuffer::audio(
            Duration::ZERO,
            AudioStreamDescription::float32_planar(0.0, 1),
            vec![f32_bytes(&[0.0; 16])],
        );
        demux.process(&zero_rate, MediaType::Audio);

        assert!(pcm.lock().unwrap().is_empty());
    }
}
