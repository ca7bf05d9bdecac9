//! Feature extraction
//!
//! Turns an [`AudioSignal`] into the per-frame descriptors used for
//! comparison: chroma, HPCP, melody contour and beat-synchronous chroma.

pub mod chroma;
pub mod melody;
mod pyin;
pub mod tempo;

pub use chroma::{extract_chroma, extract_hpcp};
pub use melody::{convert_f0_to_midi, extract_melody_contour, smooth_melody, MelodyContour};
pub use tempo::{beat_synchronize, estimate_tempo, track_beats};

use crate::audio::AudioSignal;
use crate::config::CompareConfig;
use crate::error::FeatureExtractionError;
use crate::transform::{compute_stft, frame_count};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Everything extracted from one track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Pitch-class profile, T x 12
    pub chroma: Vec<Vec<f32>>,
    /// High-resolution pitch-class profile, T x 36
    pub hpcp: Vec<Vec<f32>>,
    /// Raw f0 in Hz, 0.0 when unvoiced
    pub f0: Vec<f32>,
    pub f0_smoothed: Vec<f32>,
    pub voiced: Vec<bool>,
    /// Smoothed f0 as MIDI note numbers, 0.0 when unvoiced
    pub midi: Vec<f32>,
    /// Chroma aggregated between beats, B x 12
    pub chroma_beat_sync: Vec<Vec<f32>>,
    /// Beat positions in seconds
    pub beat_times: Vec<f64>,
    /// Beats per minute, 0.0 when no pulse was found
    pub tempo: f32,
    /// Seconds
    pub duration: f64,
    /// Every input sample was zero
    #[serde(default)]
    pub silent: bool,
    pub hop_length: usize,
    pub sample_rate: u32,
}

impl FeatureSet {
    /// Number of analysis frames
    pub fn num_frames(&self) -> usize {
        self.chroma.len()
    }

    pub fn voiced_count(&self) -> usize {
        self.voiced.iter().filter(|v| **v).count()
    }

    /// True when the analyzed signal carried no energy at all
    ///
    /// Taken from the samples, not the chroma: material outside the chroma
    /// band still counts as sound.
    pub fn is_silent(&self) -> bool {
        self.silent
    }
}

/// Extracts a [`FeatureSet`] with a fixed configuration
pub struct FeatureExtractor<'a> {
    config: &'a CompareConfig,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(config: &'a CompareConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, signal: &AudioSignal) -> Result<FeatureSet, FeatureExtractionError> {
        let config = self.config;
        if signal.is_empty() {
            return Err(FeatureExtractionError::EmptySignal);
        }
        if config.hop_length == 0 || config.fft_size == 0 {
            return Err(FeatureExtractionError::InvalidParameter(
                "hop_length and fft_size must be > 0".to_string(),
            ));
        }

        let start = Instant::now();
        let num_frames = frame_count(signal.len(), config.hop_length);

        let spectrogram = compute_stft(
            signal.samples(),
            signal.sample_rate(),
            config.fft_size,
            config.hop_length,
        );
        let chroma = extract_chroma(&spectrogram, config);
        let hpcp = extract_hpcp(&spectrogram, config);

        let contour = if config.melody_enabled {
            extract_melody_contour(signal, config)?
        } else {
            MelodyContour {
                f0: vec![0.0; num_frames],
                voiced: vec![false; num_frames],
            }
        };
        let f0_smoothed = smooth_melody(&contour.f0, config.melody_smoothing_window);
        let midi = convert_f0_to_midi(&f0_smoothed);

        let rhythm = tempo::analyze_rhythm(&spectrogram, config.hop_length, config);
        let chroma_beat_sync = tempo::sync_frames(&chroma, &rhythm.beat_frames);
        let beat_times = rhythm.beat_times(config.hop_length, signal.sample_rate());

        log::debug!(
            "Extracted {} frames ({} voiced, {:.1} BPM) in {:?}",
            num_frames,
            contour.voiced_count(),
            rhythm.tempo,
            start.elapsed()
        );

        Ok(FeatureSet {
            chroma,
            hpcp,
            f0: contour.f0,
            f0_smoothed,
            voiced: contour.voiced,
            midi,
            chroma_beat_sync,
            beat_times,
            tempo: rhythm.tempo,
            duration: signal.duration(),
            silent: signal.is_silent(),
            hop_length: config.hop_length,
            sample_rate: signal.sample_rate(),
        })
    }
}

/// Extract every feature of a signal
pub fn extract_features(
    signal: &AudioSignal,
    config: &CompareConfig,
) -> Result<FeatureSet, FeatureExtractionError> {
    FeatureExtractor::new(config).extract(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, seconds: f32) -> AudioSignal {
        let samples = (0..(seconds * 22050.0) as usize)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 22050.0).sin())
            .collect();
        AudioSignal::new(samples, 22050)
    }

    #[test]
    fn test_all_features_share_frame_count() {
        let signal = tone(440.0, 2.0);
        let features = extract_features(&signal, &CompareConfig::default()).unwrap();
        let t = frame_count(signal.len(), 512);
        assert_eq!(features.chroma.len(), t);
        assert_eq!(features.hpcp.len(), t);
        assert_eq!(features.f0.len(), t);
        assert_eq!(features.f0_smoothed.len(), t);
        assert_eq!(features.voiced.len(), t);
        assert_eq!(features.midi.len(), t);
        assert!(features.chroma.iter().all(|f| f.len() == 12));
        assert!(features.hpcp.iter().all(|f| f.len() == 36));
        assert!(!features.chroma_beat_sync.is_empty());
    }

    #[test]
    fn test_silence_does_not_fail() {
        let signal = AudioSignal::new(vec![0.0; 22050 * 2], 22050);
        let features = extract_features(&signal, &CompareConfig::default()).unwrap();
        assert!(features.is_silent());
        assert_eq!(features.voiced_count(), 0);
        assert_eq!(features.tempo, 0.0);
        assert!(features.beat_times.is_empty());
    }

    #[test]
    fn test_sound_outside_chroma_band_is_not_silent() {
        // Too quiet to register in any chroma frame
        let samples = tone(440.0, 2.0).samples().iter().map(|s| s * 1e-9).collect();
        let quiet = AudioSignal::new(samples, 22050);
        let features = extract_features(&quiet, &CompareConfig::default()).unwrap();
        assert!(features.chroma.iter().all(|f| f.iter().all(|&v| v == 0.0)));
        assert!(!features.is_silent());

        // Below the 65 Hz chroma floor
        let rumble = extract_features(&tone(40.0, 2.0), &CompareConfig::default()).unwrap();
        assert!(!rumble.is_silent());
    }

    #[test]
    fn test_empty_signal_is_an_error() {
        let signal = AudioSignal::new(Vec::new(), 22050);
        let result = extract_features(&signal, &CompareConfig::default());
        assert!(matches!(result, Err(FeatureExtractionError::EmptySignal)));
    }

    #[test]
    fn test_disabled_melody_is_unvoiced() {
        let config = CompareConfig {
            melody_enabled: false,
            ..CompareConfig::default()
        };
        let features = extract_features(&tone(440.0, 1.0), &config).unwrap();
        assert_eq!(features.voiced_count(), 0);
        assert!(features.midi.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_tone_is_voiced_near_a4() {
        let features = extract_features(&tone(440.0, 2.0), &CompareConfig::default()).unwrap();
        let mid = features.num_frames() / 2;
        assert!(features.voiced[mid]);
        assert!((features.midi[mid] - 69.0).abs() < 0.5);
    }
}
