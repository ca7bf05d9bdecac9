//! Pitch-class profiles: 12-bin chroma and 36-bin HPCP
//!
//! Both fold STFT power onto a single-octave pitch-class axis. Bin 0 is C;
//! with `n` bins per octave, each semitone spans `n / 12` bins.

use crate::config::CompareConfig;
use crate::transform::Spectrogram;

/// Energy below this is treated as an empty frame
const MIN_FRAME_ENERGY: f32 = 1e-10;

/// 12-bin chroma, one row per frame
pub fn extract_chroma(spectrogram: &Spectrogram, config: &CompareConfig) -> Vec<Vec<f32>> {
    fold_pitch_classes(
        spectrogram,
        config.chroma_bins,
        config.chroma_min_freq,
        config.chroma_max_freq,
        config.tuning_freq,
        config.chroma_floor,
    )
}

/// High-resolution harmonic pitch class profile, one row per frame
///
/// Spans `hpcp_octaves` octaves upwards from `hpcp_min_freq` before folding.
pub fn extract_hpcp(spectrogram: &Spectrogram, config: &CompareConfig) -> Vec<Vec<f32>> {
    let max_freq = config.hpcp_min_freq * 2.0f32.powi(config.hpcp_octaves as i32);
    fold_pitch_classes(
        spectrogram,
        config.hpcp_bins,
        config.hpcp_min_freq,
        max_freq,
        config.tuning_freq,
        config.chroma_floor,
    )
}

/// Fold spectral power in `[min_freq, max_freq)` onto `n_bins` pitch classes
///
/// Each FFT bin contributes to its two nearest pitch-class bins with a
/// triangular weight. Frames are scaled so their largest bin is 1.0; silent
/// frames stay all-zero. Bins under `floor` after scaling are zeroed, which
/// drops window leakage and click energy from neighbouring pitch classes.
pub fn fold_pitch_classes(
    spectrogram: &Spectrogram,
    n_bins: usize,
    min_freq: f32,
    max_freq: f32,
    tuning_freq: f32,
    floor: f32,
) -> Vec<Vec<f32>> {
    // C4 relative to the A4 tuning reference
    let c_ref = tuning_freq * 2.0f32.powf(-9.0 / 12.0);
    let nyquist = spectrogram.sample_rate as f32 / 2.0;
    let max_freq = max_freq.min(nyquist);

    // Precompute (fft_bin, lower class, upper class, upper weight)
    let mut mapping = Vec::new();
    for bin in 1..spectrogram.num_bins {
        let freq = spectrogram.bin_frequency(bin);
        if freq < min_freq || freq >= max_freq {
            continue;
        }
        let position = (n_bins as f32 * (freq / c_ref).log2()).rem_euclid(n_bins as f32);
        let lower = position.floor() as usize % n_bins;
        let upper = (lower + 1) % n_bins;
        let frac = position - position.floor();
        mapping.push((bin, lower, upper, frac));
    }

    spectrogram
        .magnitudes
        .iter()
        .map(|frame| {
            let mut profile = vec![0.0f32; n_bins];
            for &(bin, lower, upper, frac) in &mapping {
                let power = frame[bin] * frame[bin];
                profile[lower] += power * (1.0 - frac);
                profile[upper] += power * frac;
            }
            let peak = profile.iter().cloned().fold(0.0f32, f32::max);
            if peak > MIN_FRAME_ENERGY {
                for v in profile.iter_mut() {
                    *v /= peak;
                    if *v < floor {
                        *v = 0.0;
                    }
                }
            } else {
                profile.iter_mut().for_each(|v| *v = 0.0);
            }
            profile
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::compute_stft;
    use std::f32::consts::PI;

    fn tone(freq: f32, seconds: f32, sr: u32) -> Vec<f32> {
        (0..(seconds * sr as f32) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    fn dominant(profile: &[f32]) -> usize {
        profile
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    #[test]
    fn test_a440_lands_on_pitch_class_a() {
        let config = CompareConfig::default();
        let samples = tone(440.0, 1.0, config.sample_rate);
        let spec = compute_stft(&samples, config.sample_rate, config.fft_size, config.hop_length);
        let chroma = extract_chroma(&spec, &config);
        assert_eq!(chroma.len(), spec.num_frames);
        let mid = &chroma[chroma.len() / 2];
        assert_eq!(mid.len(), 12);
        assert_eq!(dominant(mid), 9);
        assert!((mid[9] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hpcp_has_three_bins_per_semitone() {
        let config = CompareConfig::default();
        let samples = tone(440.0, 1.0, config.sample_rate);
        let spec = compute_stft(&samples, config.sample_rate, config.fft_size, config.hop_length);
        let hpcp = extract_hpcp(&spec, &config);
        let mid = &hpcp[hpcp.len() / 2];
        assert_eq!(mid.len(), 36);
        let peak = dominant(mid) as i32;
        assert!((peak - 27).abs() <= 1, "A should fold near bin 27, got {}", peak);
    }

    #[test]
    fn test_floor_drops_weak_pitch_classes() {
        let config = CompareConfig::default();
        let sr = config.sample_rate;
        // C4 with a quiet G4 and a clicky onset every half second
        let samples: Vec<f32> = tone(261.63, 2.0, sr)
            .iter()
            .zip(tone(392.0, 2.0, sr))
            .enumerate()
            .map(|(i, (c, g))| {
                let click = if i % (sr as usize / 2) == 0 { 1.0 } else { 0.0 };
                c + 0.2 * g + click
            })
            .collect();
        let spec = compute_stft(&samples, sr, config.fft_size, config.hop_length);

        let raw = extract_chroma(&spec, &CompareConfig { chroma_floor: 0.0, ..config.clone() });
        let floored = extract_chroma(&spec, &config);
        let mid = spec.num_frames / 2;
        assert!(raw[mid].iter().filter(|&&v| v > 0.0).count() > 2);

        // G at 0.2 amplitude carries 4% of the C power
        assert_eq!(dominant(&floored[mid]), 0);
        assert_eq!(floored[mid][7], 0.0);
        for frame in &floored {
            assert!(frame.iter().all(|&v| v == 0.0 || v >= config.chroma_floor));
        }
    }

    #[test]
    fn test_silence_gives_zero_profile() {
        let config = CompareConfig::default();
        let spec = compute_stft(&vec![0.0; 8192], config.sample_rate, config.fft_size, config.hop_length);
        let chroma = extract_chroma(&spec, &config);
        assert!(chroma.iter().all(|frame| frame.iter().all(|&v| v == 0.0)));
    }
}
