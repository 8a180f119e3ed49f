use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use livepeek_core::PcmBuffer;

use crate::sink::AudioSink;

/// Lowest level reported, in dBFS.
pub const MIN_POWER_DB: f32 = -160.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevels {
    /// RMS power across all channels, dBFS.
    pub average_power_db: f32,
    pub peak_power_db: f32,
}

impl AudioLevels {
    pub const SILENCE: Self = Self { average_power_db: MIN_POWER_DB, peak_power_db: MIN_POWER_DB };
}

impl Default for AudioLevels {
    fn default() -> Self {
        Self::SILENCE
    }
}

fn to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 || !amplitude.is_finite() {
        return MIN_POWER_DB;
    }
    (20.0 * amplitude.log10()).max(MIN_POWER_DB)
}

/// Level meter fed from the audio delivery path.
#[derive(Default)]
pub struct PowerMeter {
    levels: Mutex<AudioLevels>,
    buffers: AtomicU64,
}

impl PowerMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure(buffer: &PcmBuffer) -> AudioLevels {
        let mut sum_squares = 0.0f64;
        let mut count = 0usize;
        let mut peak = 0.0f32;
        for channel in 0..buffer.format().channel_count as usize {
            for sample in buffer.samples(channel) {
                let magnitude = sample.abs();
                if magnitude.is_finite() {
                    sum_squares += f64::from(magnitude) * f64::from(magnitude);
                    peak = peak.max(magnitude);
                    count += 1;
                }
            }
        }
        if count == 0 {
            return AudioLevels::SILENCE;
        }
        let rms = (sum_squares / count as f64).sqrt() as f32;
        AudioLevels { average_power_db: to_db(rms), peak_power_db: to_db(peak) }
    }

    pub fn levels(&self) -> AudioLevels {
        *self.levels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffers measured so far.
    pub fn buffers_processed(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Resets to silence, e.g. after capture stops.
    pub fn process_silence(&self) {
        *self.levels.lock().unwrap_or_else(PoisonError::into_inner) = AudioLevels::SILENCE;
    }
}

impl AudioSink for PowerMeter {
    fn process_pcm(&self, buffer: PcmBuffer) {
        let levels = Self::measure(&buffer);
        *self.levels.lock().unwrap_or_else(PoisonError::into_inner) = levels;
        self.buffers.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use livepeek_core::{f32_bytes, AudioBufferList, PcmFormat};

    use super::*;

    fn pcm(channels: Vec<Vec<f32>>) -> PcmBuffer {
        let format = PcmFormat::standard(48_000.0, channels.len() as u32).unwrap();
        let list = AudioBufferList { buffers: channels.iter().map(|c| f32_bytes(c)).collect() };
        PcmBuffer::wrap(format, &list).unwrap()
    }

    #[test]
    fn full_scale_square_wave_is_zero_db() {
        let levels = PowerMeter::measure(&pcm(vec![vec![1.0, -1.0, 1.0, -1.0]]));
        assert!(levels.average_power_db.abs() < 1e-4);
        assert!(levels.peak_power_db.abs() < 1e-4);
    }

    #[test]
    fn half_amplitude_is_about_minus_six_db() {
        let levels = PowerMeter::measure(&pcm(vec![vec![0.5; 32], vec![-0.5; 32]]));
        assert!((levels.average_power_db + 6.0206).abs() < 1e-3, "{levels:?}");
    }

    #[test]
    fn silence_reports_the_floor() {
        let meter = PowerMeter::new();
        meter.process_pcm(pcm(vec![vec![0.0; 128]]));
        assert_eq!(meter.levels(), AudioLevels::SILENCE);
        assert_eq!(meter.buffers_processed(), 1);
    }

    #[test]
    fn process_silence_resets_levels() {
        let meter = PowerMeter::new();
        meter.process_pcm(pcm(vec![vec![0.25; 16]]));
        assert!(meter.levels().peak_power_db > MIN_POWER_DB);
        meter.process_silence();
        assert_eq!(meter.levels(), AudioLevels::SILENCE);
    }
}
