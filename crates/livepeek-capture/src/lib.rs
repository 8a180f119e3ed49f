//! livepeek-capture — from platform sample buffers to a live frame sequence.
//!
//! # Pipeline
//!
//! ```text
//! capture backend (platform threads, one per media type)
//!   │  StreamDelegate::did_output_sample(sample, Video | Audio)
//!   ▼
//! CaptureStreamOutput
//!   │  SampleDemultiplexer ── audio ──► AudioSink (PowerMeter)
//!   │        │ video
//!   ▼        ▼
//! FrameProducer::send ──► [single slot, latest wins] ──► FrameStream::next().await
//!                                                            │
//!                                                            ▼
//!                                                   session loop → PreviewSink
//! ```
//!
//! `StreamDelegate::did_stop_with_error` finishes the frame sequence with the
//! backend's error; later samples are ignored.

pub mod backend;
pub mod bridge;
pub mod demux;
pub mod meter;
pub mod output;
pub mod sink;
pub mod synthetic;

#[cfg(feature = "gst")]
pub mod gst;

pub use backend::{can_record, CaptureBackend, StreamDelegate};
pub use bridge::{frame_channel, BridgeStats, FrameProducer, FrameStream};
pub use demux::SampleDemultiplexer;
pub use meter::{AudioLevels, PowerMeter};
pub use output::CaptureStreamOutput;
pub use sink::{AudioSink, PreviewSink};
pub use synthetic::SyntheticBackend;
