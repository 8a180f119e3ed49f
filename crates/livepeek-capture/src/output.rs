use std::sync::Arc;

use livepeek_core::{CaptureError, MediaType, SampleBuffer};
use tracing::warn;

use crate::backend::StreamDelegate;
use crate::bridge::FrameProducer;
use crate::demux::SampleDemultiplexer;
use crate::sink::AudioSink;

/// Delegate handed to the backend for one stream: demultiplexes samples,
/// forwards video into the bridge and audio to an optional [`AudioSink`].
pub struct CaptureStreamOutput {
    demux: SampleDemultiplexer,
    producer: FrameProducer,
}

impl CaptureStreamOutput {
    pub fn new(producer: FrameProducer, audio: Option<Arc<dyn AudioSink>>) -> Self {
        let video = producer.clone();
        let mut demux = SampleDemultiplexer::new().on_frame(move |frame| {
            video.send(frame);
        });
        if let Some(audio) = audio {
            demux = demux.on_pcm(move |buffer| audio.process_pcm(buffer));
        }
        Self { demux, producer }
    }
}

impl StreamDelegate for CaptureStreamOutput {
    fn did_output_sample(&self, sample: SampleBuffer, kind: MediaType) {
        self.demux.process(&sample, kind);
    }

    fn did_stop_with_error(&self, error: CaptureError) {
        let error = if error.is_terminal() { error } else { CaptureError::terminated(error.to_string()) };
        warn!("capture stream stopped: {}", error);
        self.producer.finish(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use livepeek_core::{
        f32_bytes, frame_attachments, AudioStreamDescription, FrameStatus, PcmBuffer, Rect,
        SurfaceHandle,
    };

    use super::*;
    use crate::bridge::frame_channel;

    #[derive(Default)]
    struct CountingAudio(Mutex<usize>);

    impl AudioSink for CountingAudio {
        fn process_pcm(&self, _buffer: PcmBuffer) {
            *self.0.lock().unwrap() += 1;
        }
    }

    fn video_sample() -> SampleBuffer {
        SampleBuffer::video(
            Duration::ZERO,
            Some(SurfaceHandle::new(9, 2, 2, 8, Bytes::from_static(&[0; 16]))),
            frame_attachments(FrameStatus::Complete, Rect::new(0.0, 0.0, 320.0, 200.0), 1.0, 1.0),
        )
    }

    fn audio_sample() -> SampleBuffer {
        SampleBuffer::audio(
            Duration::ZERO,
            AudioStreamDescription::float32_planar(44_100.0, 1),
            vec![f32_bytes(&[0.0; 64])],
        )
    }

    #[tokio::test]
    async fn audio_path_does_not_touch_the_frame_sequence() {
        let (producer, mut stream) = frame_channel();
        let audio = Arc::new(CountingAudio::default());
        let output = CaptureStreamOutput::new(producer, Some(audio.clone() as Arc<dyn AudioSink>));

        output.did_output_sample(audio_sample(), MediaType::Audio);
        output.did_output_sample(video_sample(), MediaType::Video);
        output.did_output_sample(audio_sample(), MediaType::Audio);
        drop(output);

        assert_eq!(*audio.0.lock().unwrap(), 2);
        assert!(stream.next().await.expect("frame").is_ok());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn backend_error_terminates_once() {
        let (producer, mut stream) = frame_channel();
        let output = CaptureStreamOutput::new(producer, None);

        output.did_stop_with_error(CaptureError::terminated("window closed"));
        output.did_stop_with_error(CaptureError::terminated("second report"));
        output.did_output_sample(video_sample(), MediaType::Video);

        assert_eq!(stream.next().await, Some(Err(CaptureError::terminated("window closed"))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn non_terminal_backend_errors_are_wrapped() {
        let (producer, mut stream) = frame_channel();
        let output = CaptureStreamOutput::new(producer, None);
        output.did_stop_with_error(CaptureError::rejected("bad caps"));

        match stream.next().await {
            Some(Err(CaptureError::StreamTerminated { reason })) => assert!(reason.contains("bad caps")),
            other => panic!("expected StreamTerminated, got {other:?}"),
        }
    }
}
