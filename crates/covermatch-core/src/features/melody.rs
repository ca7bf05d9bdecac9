//! Melody contour: f0 tracking, MIDI conversion and smoothing

use super::pyin::{self, PyinParams};
use crate::audio::AudioSignal;
use crate::config::{CompareConfig, MelodyMethod};
use crate::error::FeatureExtractionError;
use crate::transform::compute_stft;

/// Frequencies below this are treated as unvoiced when converting to MIDI
const MIN_MIDI_FREQ: f32 = 50.0;
/// Peak-picking keeps peaks above this fraction of the frame maximum
const PEAK_THRESHOLD: f32 = 0.1;

/// Per-frame fundamental frequency, 0.0 where unvoiced
#[derive(Debug, Clone, Default)]
pub struct MelodyContour {
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
}

impl MelodyContour {
    pub fn voiced_count(&self) -> usize {
        self.voiced.iter().filter(|v| **v).count()
    }
}

/// Track the melody of a signal with the configured method
pub fn extract_melody_contour(
    signal: &AudioSignal,
    config: &CompareConfig,
) -> Result<MelodyContour, FeatureExtractionError> {
    if signal.is_empty() {
        return Err(FeatureExtractionError::EmptySignal);
    }
    if config.melody_min_freq <= 0.0 || config.melody_max_freq <= config.melody_min_freq {
        return Err(FeatureExtractionError::InvalidParameter(format!(
            "melody range {}..{} Hz",
            config.melody_min_freq, config.melody_max_freq
        )));
    }
    // The difference function needs two periods of the lowest pitch
    let min_frame = 2 * (signal.sample_rate() as f32 / config.melody_min_freq).ceil() as usize;
    if config.melody_frame_length == 0 || config.melody_frame_length < min_frame {
        return Err(FeatureExtractionError::InvalidParameter(format!(
            "melody_frame_length {} is shorter than {} samples needed for {} Hz",
            config.melody_frame_length, min_frame, config.melody_min_freq
        )));
    }

    let contour = match config.melody_method {
        MelodyMethod::Probabilistic => {
            let params = PyinParams {
                sample_rate: signal.sample_rate(),
                frame_length: config.melody_frame_length,
                hop_length: config.hop_length,
                fmin: config.melody_min_freq,
                fmax: config.melody_max_freq,
            };
            let (f0, voiced) = pyin::track(signal.samples(), &params);
            MelodyContour { f0, voiced }
        }
        MelodyMethod::PeakPicking => peak_picking(signal, config),
    };

    log::debug!(
        "Melody: {} frames, {} voiced ({:?})",
        contour.f0.len(),
        contour.voiced_count(),
        config.melody_method
    );

    Ok(contour)
}

/// Strongest interpolated spectral peak inside the melody range
fn peak_picking(signal: &AudioSignal, config: &CompareConfig) -> MelodyContour {
    let spec = compute_stft(
        signal.samples(),
        signal.sample_rate(),
        config.melody_frame_length,
        config.hop_length,
    );

    let mut contour = MelodyContour {
        f0: Vec::with_capacity(spec.num_frames),
        voiced: Vec::with_capacity(spec.num_frames),
    };

    for frame in &spec.magnitudes {
        let frame_max = frame.iter().cloned().fold(0.0f32, f32::max);
        let mut best: Option<(f32, f32)> = None;

        if frame_max > 1e-6 {
            for bin in 1..frame.len() - 1 {
                let (a, b, c) = (frame[bin - 1], frame[bin], frame[bin + 1]);
                if b <= a || b < c || b < PEAK_THRESHOLD * frame_max {
                    continue;
                }
                let denom = a - 2.0 * b + c;
                let shift = if denom.abs() > 1e-12 { 0.5 * (a - c) / denom } else { 0.0 };
                let freq = (bin as f32 + shift) * spec.sample_rate as f32 / spec.fft_size as f32;
                if freq < config.melody_min_freq || freq > config.melody_max_freq {
                    continue;
                }
                if best.map_or(true, |(_, mag)| b > mag) {
                    best = Some((freq, b));
                }
            }
        }

        match best {
            Some((freq, _)) => {
                contour.f0.push(freq);
                contour.voiced.push(true);
            }
            None => {
                contour.f0.push(0.0);
                contour.voiced.push(false);
            }
        }
    }

    contour
}

/// Convert Hz to MIDI note numbers; anything under 50 Hz maps to 0.0
pub fn convert_f0_to_midi(f0: &[f32]) -> Vec<f32> {
    f0.iter()
        .map(|&f| {
            if f >= MIN_MIDI_FREQ {
                69.0 + 12.0 * (f / 440.0).log2()
            } else {
                0.0
            }
        })
        .collect()
}

/// Median-filter the voiced part of a contour
///
/// Unvoiced frames are left at zero and skipped by the filter. Contours with
/// no more voiced frames than `window` are returned unchanged.
pub fn smooth_melody(f0: &[f32], window: usize) -> Vec<f32> {
    let voiced_idx: Vec<usize> = (0..f0.len()).filter(|&i| f0[i] > 0.0).collect();
    let mut out = f0.to_vec();
    if window < 2 || voiced_idx.len() <= window {
        return out;
    }

    let values: Vec<f32> = voiced_idx.iter().map(|&i| f0[i]).collect();
    let filtered = median_filter(&values, window);
    for (&i, v) in voiced_idx.iter().zip(filtered) {
        out[i] = v;
    }
    out
}

/// Median filter with mirrored edges (`d c b a | a b c d | d c b a`)
fn median_filter(values: &[f32], size: usize) -> Vec<f32> {
    let n = values.len() as isize;
    let left = (size / 2) as isize;
    let right = size as isize - left - 1;
    let mut window = Vec::with_capacity(size);

    (0..n)
        .map(|i| {
            window.clear();
            for j in (i - left)..=(i + right) {
                let idx = if j < 0 {
                    -j - 1
                } else if j >= n {
                    2 * n - j - 1
                } else {
                    j
                };
                window.push(values[idx.clamp(0, n - 1) as usize]);
            }
            window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            window[size / 2]
        })
        .collect()
}
