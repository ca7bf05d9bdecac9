//! Audio decoding, resampling and normalization
//!
//! Turns an encoded byte buffer (WAV, MP3, FLAC, OGG, or anything symphonia
//! can probe) into a mono, peak-normalized [`AudioSignal`] at the analysis rate.

mod container;
mod decoder;
mod resample;

pub use decoder::{decode_bytes, decode_file, AudioData};
pub use resample::resample_to_target;

/// Supported audio formats, detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,

    // Container formats handled by symphonia
    Mp4,
    Matroska,

    Unknown,
}

impl AudioFormat {
    /// Detect format from the first bytes of a stream
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => AudioFormat::Wav,
            [b'f', b'L', b'a', b'C', ..] => AudioFormat::Flac,
            [b'O', b'g', b'g', b'S', ..] => AudioFormat::Ogg,
            [b'I', b'D', b'3', ..] => AudioFormat::Mp3,
            // MPEG audio frame sync; layer bits of zero mean ADTS (AAC) instead
            [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 && b1 & 0x06 != 0 => AudioFormat::Mp3,
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => AudioFormat::Mp4,
            [0x1A, 0x45, 0xDF, 0xA3, ..] => AudioFormat::Matroska,
            _ => AudioFormat::Unknown,
        }
    }

    /// Formats decoded through symphonia's probe
    pub fn is_container(&self) -> bool {
        matches!(self, AudioFormat::Mp4 | AudioFormat::Matroska | AudioFormat::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp4 => "mp4",
            AudioFormat::Matroska => "matroska",
            AudioFormat::Unknown => "unknown",
        }
    }
}

/// Mono, peak-normalized audio at a fixed sample rate
///
/// Immutable once constructed; every feature is derived from the same buffer.
#[derive(Debug, Clone)]
pub struct AudioSignal {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// True when no sample carries energy
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

/// Scale samples so the largest magnitude is 1.0
///
/// Zero-energy input is returned unchanged.
pub fn normalize_peak(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return samples;
    }
    for s in samples.iter_mut() {
        *s /= peak;
    }
    samples
}
