//! Raw sample buffers as delivered by a capture backend, plus the PCM
//! wrapper produced from audio samples.
//!
//! A [`SampleBuffer`] mirrors what platform capture services hand to their
//! output callbacks: a validity flag, a per-sample attachment dictionary,
//! an optional image buffer and, for audio, a stream description together
//! with the buffer list holding the samples.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::types::{Rect, SurfaceHandle};

// MARK: - MediaType

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Audio,
}

// MARK: - FrameStatus

/// Per-frame completion status attached to every video sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// New content was rendered into the frame.
    Complete,
    /// Nothing changed since the previous frame.
    Idle,
    Blank,
    Suspended,
    Started,
    Stopped,
}

impl FrameStatus {
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Complete),
            1 => Some(Self::Idle),
            2 => Some(Self::Blank),
            3 => Some(Self::Suspended),
            4 => Some(Self::Started),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn raw(self) -> i64 {
        match self {
            Self::Complete => 0,
            Self::Idle => 1,
            Self::Blank => 2,
            Self::Suspended => 3,
            Self::Started => 4,
            Self::Stopped => 5,
        }
    }
}

// MARK: - Attachments

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentKey {
    Status,
    ContentRect,
    ContentScale,
    ScaleFactor,
    DisplayTime,
}

/// Loosely typed attachment value; consumers must check the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentValue {
    Integer(i64),
    Float(f64),
    Dictionary(BTreeMap<String, f64>),
}

impl AttachmentValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) if value.is_finite() => Some(*value),
            _ => None,
        }
    }

    pub fn as_rect(&self) -> Option<Rect> {
        match self {
            Self::Dictionary(entries) => {
                Rect::from_dictionary(entries.iter().map(|(k, v)| (k.as_str(), *v)))
            }
            _ => None,
        }
    }

    pub fn rect(rect: Rect) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("X".to_owned(), rect.origin.x);
        entries.insert("Y".to_owned(), rect.origin.y);
        entries.insert("Width".to_owned(), rect.size.width);
        entries.insert("Height".to_owned(), rect.size.height);
        Self::Dictionary(entries)
    }
}

pub type SampleAttachments = BTreeMap<AttachmentKey, AttachmentValue>;

/// Attachments of a video frame as a well-behaved backend reports them.
pub fn frame_attachments(
    status: FrameStatus,
    content_rect: Rect,
    content_scale: f64,
    scale_factor: f64,
) -> SampleAttachments {
    let mut attachments = SampleAttachments::new();
    attachments.insert(AttachmentKey::Status, AttachmentValue::Integer(status.raw()));
    attachments.insert(AttachmentKey::ContentRect, AttachmentValue::rect(content_rect));
    attachments.insert(AttachmentKey::ContentScale, AttachmentValue::Float(content_scale));
    attachments.insert(AttachmentKey::ScaleFactor, AttachmentValue::Float(scale_factor));
    attachments
}

// MARK: - Image / audio payloads

/// Pixel buffer carried by a video sample. Not every pixel buffer is
/// surface-backed.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub surface: Option<SurfaceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormatId {
    LinearPcm,
    Other(u32),
}

/// Basic description of an audio stream, as attached to audio samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStreamDescription {
    pub sample_rate: f64,
    pub format_id: AudioFormatId,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
    pub is_float: bool,
    pub is_non_interleaved: bool,
}

impl AudioStreamDescription {
    /// 32-bit float, one buffer per channel.
    pub fn float32_planar(sample_rate: f64, channels: u32) -> Self {
        Self {
            sample_rate,
            format_id: AudioFormatId::LinearPcm,
            channels_per_frame: channels,
            bits_per_channel: 32,
            is_float: true,
            is_non_interleaved: true,
        }
    }
}

/// Backing storage of an audio sample; one entry per channel when
/// non-interleaved.
#[derive(Debug, Clone, Default)]
pub struct AudioBufferList {
    pub buffers: Vec<Bytes>,
}

// MARK: - SampleBuffer

#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    pub is_valid: bool,
    pub presentation_time: Duration,
    /// Per-sample attachment array; video frames carry exactly one entry.
    pub attachments: Vec<SampleAttachments>,
    pub image_buffer: Option<ImageBuffer>,
    pub audio_format: Option<AudioStreamDescription>,
    pub audio_buffers: Option<AudioBufferList>,
}

impl SampleBuffer {
    pub fn video(presentation_time: Duration, surface: Option<SurfaceHandle>, attachments: SampleAttachments) -> Self {
        Self {
            is_valid: true,
            presentation_time,
            attachments: vec![attachments],
            image_buffer: Some(ImageBuffer { surface }),
            ..Default::default()
        }
    }

    pub fn audio(presentation_time: Duration, format: AudioStreamDescription, buffers: Vec<Bytes>) -> Self {
        Self {
            is_valid: true,
            presentation_time,
            audio_format: Some(format),
            audio_buffers: Some(AudioBufferList { buffers }),
            ..Default::default()
        }
    }

    pub fn first_attachments(&self) -> Option<&SampleAttachments> {
        self.attachments.first()
    }
}

// MARK: - PCM

pub const MAX_PCM_CHANNELS: u32 = 8;

/// Standard PCM format: 32-bit float, deinterleaved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcmFormat {
    pub sample_rate: f64,
    pub channel_count: u32,
}

impl PcmFormat {
    /// Standard format for the given rate and channel count, or `None` when
    /// either cannot describe a real stream.
    pub fn standard(sample_rate: f64, channel_count: u32) -> Option<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return None;
        }
        if channel_count == 0 || channel_count > MAX_PCM_CHANNELS {
            return None;
        }
        Some(Self { sample_rate, channel_count })
    }
}

/// PCM samples wrapping the delivering sample's storage (no copy).
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    format: PcmFormat,
    frame_length: usize,
    channels: Vec<Bytes>,
}

impl PcmBuffer {
    const BYTES_PER_SAMPLE: usize = 4;

    /// Wraps `list` as `format`. The list must hold one equally sized,
    /// float-aligned buffer per channel.
    pub fn wrap(format: PcmFormat, list: &AudioBufferList) -> Option<Self> {
        if list.buffers.len() != format.channel_count as usize {
            return None;
        }
        let byte_len = list.buffers.first()?.len();
        if byte_len % Self::BYTES_PER_SAMPLE != 0 || list.buffers.iter().any(|b| b.len() != byte_len) {
            return None;
        }
        Some(Self {
            format,
            frame_length: byte_len / Self::BYTES_PER_SAMPLE,
            channels: list.buffers.clone(),
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Raw storage of `channel`; shares memory with the original sample.
    pub fn channel_data(&self, channel: usize) -> Option<&Bytes> {
        self.channels.get(channel)
    }

    pub fn samples(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.channels
            .get(channel)
            .map(|bytes| bytes.as_ref())
            .unwrap_or(&[])
            .chunks_exact(Self::BYTES_PER_SAMPLE)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_length as f64 / self.format.sample_rate)
    }
}

/// Encodes `samples` as little-endian float32 bytes.
pub fn f32_bytes(samples: &[f32]) -> Bytes {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>().into()
}
