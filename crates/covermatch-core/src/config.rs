//! Configuration parameters for the comparison pipeline
//!
//! Defaults follow common MIR practice: 22.05 kHz analysis rate, 512-sample
//! hop, pitch tracking between C2 and C7.

use crate::error::ComparisonError;
use serde::{Deserialize, Serialize};

/// Melody tracker selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelodyMethod {
    /// Probabilistic YIN with Viterbi smoothing
    Probabilistic,
    /// Strongest spectral peak per frame
    PeakPicking,
}

impl Default for MelodyMethod {
    fn default() -> Self {
        MelodyMethod::Probabilistic
    }
}

/// Algorithm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    // Signal
    pub sample_rate: u32,
    pub hop_length: usize,

    // Chroma / HPCP
    pub fft_size: usize,
    pub chroma_bins: usize,
    pub chroma_min_freq: f32,
    pub chroma_max_freq: f32,
    /// Pitch-class bins below this fraction of the frame peak are zeroed
    pub chroma_floor: f32,
    pub hpcp_bins: usize,
    pub hpcp_octaves: u32,
    pub hpcp_min_freq: f32,
    pub tuning_freq: f32,

    // Melody
    pub melody_enabled: bool,
    pub melody_method: MelodyMethod,
    pub melody_frame_length: usize,
    pub melody_min_freq: f32,
    pub melody_max_freq: f32,
    pub melody_smoothing_window: usize,

    // Tempo
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub start_bpm: f32,
    pub beat_tightness: f32,

    // Segment detection
    pub segment_window: usize,
    /// Mean-similarity cut applied inside the detector
    pub detector_threshold: f64,
    /// Cut applied when deciding which detected segments to report
    pub report_threshold: f64,
    pub summary_segments: usize,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            hop_length: 512,

            fft_size: 4096,
            chroma_bins: 12,
            chroma_min_freq: 65.0,
            chroma_max_freq: 5000.0,
            chroma_floor: 0.25,
            hpcp_bins: 36,
            hpcp_octaves: 7,
            hpcp_min_freq: 32.703, // C1
            tuning_freq: 440.0,

            melody_enabled: true,
            melody_method: MelodyMethod::Probabilistic,
            melody_frame_length: 2048,
            melody_min_freq: 65.406,  // C2
            melody_max_freq: 2093.005, // C7
            melody_smoothing_window: 5,

            min_bpm: 30.0,
            max_bpm: 300.0,
            start_bpm: 120.0,
            beat_tightness: 100.0,

            segment_window: 50,
            detector_threshold: 0.7,
            report_threshold: 0.65,
            summary_segments: 5,
        }
    }
}

impl CompareConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ComparisonError> {
        let fail = |msg: &str| Err(ComparisonError::InvalidConfig(msg.to_string()));

        if self.sample_rate == 0 {
            return fail("sample_rate must be > 0");
        }
        if self.hop_length == 0 {
            return fail("hop_length must be > 0");
        }
        if self.fft_size < self.hop_length {
            return fail("fft_size must be >= hop_length");
        }
        if self.chroma_bins == 0 || self.hpcp_bins % 12 != 0 || self.hpcp_bins == 0 {
            return fail("chroma_bins must be > 0 and hpcp_bins a positive multiple of 12");
        }
        if self.chroma_min_freq >= self.chroma_max_freq {
            return fail("chroma_min_freq must be < chroma_max_freq");
        }
        if !(0.0..1.0).contains(&self.chroma_floor) {
            return fail("chroma_floor must lie in [0, 1)");
        }
        if self.melody_min_freq >= self.melody_max_freq {
            return fail("melody_min_freq must be < melody_max_freq");
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if self.melody_max_freq >= nyquist {
            return fail("melody_max_freq must be below Nyquist");
        }
        let min_lag = (self.sample_rate as f32 / self.melody_min_freq).ceil() as usize;
        if self.melody_frame_length < 2 * min_lag {
            return fail("melody_frame_length too short for melody_min_freq");
        }
        if self.min_bpm <= 0.0 || self.min_bpm >= self.max_bpm {
            return fail("min_bpm must be > 0 and < max_bpm");
        }
        if self.segment_window == 0 {
            return fail("segment_window must be > 0");
        }
        for threshold in [self.detector_threshold, self.report_threshold] {
            if !(0.0..=1.0).contains(&threshold) {
                return fail("similarity thresholds must lie in [0, 1]");
            }
        }
        Ok(())
    }
}
