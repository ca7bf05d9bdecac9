//! Tempo estimation, beat tracking and beat-synchronous aggregation
//!
//! # Algorithm
//!
//! 1. Onset strength: positive log-spectral flux, averaged over bins
//! 2. Tempo: autocorrelation of the onset envelope, weighted by a log-normal
//!    prior around `start_bpm` (one octave standard deviation)
//! 3. Beats: dynamic programming over the onset envelope, trading onset
//!    strength against deviation from the estimated beat period
//!    (Ellis 2007, "Beat Tracking by Dynamic Programming")

use crate::audio::AudioSignal;
use crate::config::CompareConfig;
use crate::transform::{compute_stft, Spectrogram};

/// dB range kept below the loudest bin when computing the flux
const TOP_DB: f32 = 80.0;
const POWER_FLOOR: f32 = 1e-10;
const EPSILON: f32 = 1e-10;
/// Standard deviation of the tempo prior, in octaves
const TEMPO_STD_OCTAVES: f32 = 1.0;

/// Tempo and beat positions of one track
#[derive(Debug, Clone, Default)]
pub struct Rhythm {
    /// Beats per minute, 0.0 when no pulse was found
    pub tempo: f32,
    /// Beat positions as frame indices
    pub beat_frames: Vec<usize>,
}

impl Rhythm {
    pub fn beat_times(&self, hop_length: usize, sample_rate: u32) -> Vec<f64> {
        self.beat_frames
            .iter()
            .map(|&f| f as f64 * hop_length as f64 / sample_rate as f64)
            .collect()
    }
}

/// Onset strength per frame from positive log-spectral flux
pub fn onset_envelope(spectrogram: &Spectrogram) -> Vec<f32> {
    if spectrogram.num_frames == 0 {
        return Vec::new();
    }

    let db: Vec<Vec<f32>> = spectrogram
        .magnitudes
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|m| 10.0 * (m * m).max(POWER_FLOOR).log10())
                .collect()
        })
        .collect();
    let peak = db
        .iter()
        .flat_map(|frame| frame.iter())
        .cloned()
        .fold(f32::MIN, f32::max);
    let floor = peak - TOP_DB;

    let mut envelope = vec![0.0f32; spectrogram.num_frames];
    for t in 1..spectrogram.num_frames {
        let flux: f32 = db[t]
            .iter()
            .zip(db[t - 1].iter())
            .map(|(&cur, &prev)| (cur.max(floor) - prev.max(floor)).max(0.0))
            .sum();
        envelope[t] = flux / spectrogram.num_bins as f32;
    }
    envelope
}

/// Estimate the dominant tempo in BPM; 0.0 when the envelope is flat
pub fn estimate_tempo(onset: &[f32], sample_rate: u32, hop_length: usize, config: &CompareConfig) -> f32 {
    if onset.iter().all(|&v| v <= EPSILON) {
        return 0.0;
    }

    let frame_rate = sample_rate as f32 / hop_length as f32;
    let lag_min = ((60.0 * frame_rate / config.max_bpm).floor() as usize).max(1);
    let lag_max = ((60.0 * frame_rate / config.min_bpm).ceil() as usize).min(onset.len().saturating_sub(1));
    if lag_min >= lag_max {
        return 0.0;
    }

    let acf: Vec<f32> = (0..=lag_max + 1)
        .map(|lag| {
            if lag >= onset.len() {
                return 0.0;
            }
            onset[..onset.len() - lag]
                .iter()
                .zip(onset[lag..].iter())
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();

    let weighted = |lag: usize| {
        let bpm = 60.0 * frame_rate / lag as f32;
        let octaves = (bpm / config.start_bpm).log2() / TEMPO_STD_OCTAVES;
        acf[lag] * (-0.5 * octaves * octaves).exp()
    };

    let (best_lag, best_score) = (lag_min..=lag_max)
        .map(|lag| (lag, weighted(lag)))
        .fold((0, 0.0f32), |best, (lag, score)| if score > best.1 { (lag, score) } else { best });

    if best_lag == 0 || best_score <= EPSILON {
        return 0.0;
    }

    // Parabolic refinement of the peak lag
    let refined = if best_lag > lag_min && best_lag < lag_max {
        let (a, b, c) = (weighted(best_lag - 1), best_score, weighted(best_lag + 1));
        let denom = a - 2.0 * b + c;
        if denom.abs() > EPSILON {
            best_lag as f32 + (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            best_lag as f32
        }
    } else {
        best_lag as f32
    };

    60.0 * frame_rate / refined
}

/// Dynamic-programming beat tracker; returns beat frame indices
pub fn track_beats(
    onset: &[f32],
    tempo: f32,
    sample_rate: u32,
    hop_length: usize,
    tightness: f32,
) -> Vec<usize> {
    if tempo <= 0.0 || onset.is_empty() {
        return Vec::new();
    }
    let period = 60.0 * sample_rate as f32 / (hop_length as f32 * tempo);
    if period < 1.0 {
        return Vec::new();
    }

    let n = onset.len();
    let mean = onset.iter().sum::<f32>() / n as f32;
    let std = (onset.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32).sqrt();
    if std <= EPSILON {
        return Vec::new();
    }
    let normalized: Vec<f32> = onset.iter().map(|v| v / std).collect();
    let local = local_score(&normalized, period);

    let mut cumulative = vec![0.0f32; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    let reach_far = (2.0 * period).round() as usize;
    let reach_near = ((period / 2.0).round() as usize).max(1);

    for t in 0..n {
        let mut best: Option<(usize, f32)> = None;
        if t >= reach_near {
            let start = t.saturating_sub(reach_far);
            for prev in start..=t - reach_near {
                let interval = (t - prev) as f32 / period;
                let penalty = -tightness * interval.ln().powi(2);
                let score = cumulative[prev] + penalty;
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) if score > 0.0 => {
                cumulative[t] = local[t] + score;
                backlink[t] = Some(prev);
            }
            _ => cumulative[t] = local[t],
        }
    }

    // Last beat: final cumulative-score peak that is not much weaker than a typical peak
    let peaks: Vec<usize> = (0..n)
        .filter(|&t| {
            let left = t == 0 || cumulative[t] > cumulative[t - 1];
            let right = t + 1 == n || cumulative[t] >= cumulative[t + 1];
            left && right
        })
        .collect();
    if peaks.is_empty() {
        return Vec::new();
    }
    let mut peak_scores: Vec<f32> = peaks.iter().map(|&t| cumulative[t]).collect();
    peak_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = peak_scores[peak_scores.len() / 2];
    let last = match peaks.iter().rev().find(|&&t| cumulative[t] >= 0.5 * median) {
        Some(&t) => t,
        None => return Vec::new(),
    };

    let mut beats = vec![last];
    let mut current = last;
    while let Some(prev) = backlink[current] {
        beats.push(prev);
        current = prev;
    }
    beats.reverse();

    trim_weak_edges(beats, &local)
}

/// Onset envelope smoothed with a Gaussian a beat period wide
fn local_score(onset: &[f32], period: f32) -> Vec<f32> {
    let half = period.round() as isize;
    let kernel: Vec<f32> = (-half..=half)
        .map(|k| (-0.5 * (k as f32 * 32.0 / period).powi(2)).exp())
        .collect();
    let n = onset.len() as isize;
    (0..n)
        .map(|t| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let idx = t + k as isize - half;
                    (0..n).contains(&idx).then(|| w * onset[idx as usize])
                })
                .sum()
        })
        .collect()
}

/// Drop leading and trailing beats sitting on weak onsets
fn trim_weak_edges(beats: Vec<usize>, local: &[f32]) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let rms = (beats.iter().map(|&b| local[b].powi(2)).sum::<f32>() / beats.len() as f32).sqrt();
    let threshold = 0.5 * rms;
    let start = beats.iter().position(|&b| local[b] >= threshold);
    let end = beats.iter().rposition(|&b| local[b] >= threshold);
    match (start, end) {
        (Some(s), Some(e)) => beats[s..=e].to_vec(),
        _ => Vec::new(),
    }
}

/// Tempo and beats from a precomputed spectrogram
pub fn analyze_rhythm(spectrogram: &Spectrogram, hop_length: usize, config: &CompareConfig) -> Rhythm {
    let onset = onset_envelope(spectrogram);
    let tempo = estimate_tempo(&onset, spectrogram.sample_rate, hop_length, config);
    let beat_frames = track_beats(
        &onset,
        tempo,
        spectrogram.sample_rate,
        hop_length,
        config.beat_tightness,
    );
    log::debug!("Rhythm: {:.1} BPM, {} beats", tempo, beat_frames.len());
    Rhythm { tempo, beat_frames }
}

/// Per-dimension median of the frames between consecutive beat boundaries
///
/// Boundaries are `[0, beats.., T]`; beats outside the frame range or out of
/// order are ignored. Without beats the whole track becomes one segment.
pub fn sync_frames(features: &[Vec<f32>], beat_frames: &[usize]) -> Vec<Vec<f32>> {
    let total = features.len();
    if total == 0 {
        return Vec::new();
    }

    let mut boundaries = vec![0usize];
    for &b in beat_frames {
        if b > *boundaries.last().unwrap_or(&0) && b < total {
            boundaries.push(b);
        }
    }
    boundaries.push(total);

    let dims = features[0].len();
    let mut column = Vec::new();
    boundaries
        .windows(2)
        .map(|span| {
            (0..dims)
                .map(|d| {
                    column.clear();
                    column.extend(features[span[0]..span[1]].iter().map(|frame| frame[d]));
                    median(&mut column)
                })
                .collect()
        })
        .collect()
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Estimate beats on `signal` and aggregate `features` between them
///
/// Returns the beat-synchronous features and the beat times in seconds.
pub fn beat_synchronize(
    features: &[Vec<f32>],
    signal: &AudioSignal,
    config: &CompareConfig,
) -> (Vec<Vec<f32>>, Vec<f64>) {
    let spectrogram = compute_stft(signal.samples(), signal.sample_rate(), config.fft_size, config.hop_length);
    let rhythm = analyze_rhythm(&spectrogram, config.hop_length, config);
    let synced = sync_frames(features, &rhythm.beat_frames);
    (synced, rhythm.beat_times(config.hop_length, signal.sample_rate()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// 50 ms tone bursts every `60 / bpm` seconds
    fn pulse_train(bpm: f32, seconds: f32) -> Vec<f32> {
        let sr = 22050.0;
        let period = (60.0 / bpm * sr) as usize;
        let burst = (0.05 * sr) as usize;
        (0..(seconds * sr) as usize)
            .map(|i| {
                if i % period < burst {
                    0.8 * (2.0 * PI * 1000.0 * i as f32 / sr).sin()
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn rhythm_of(samples: &[f32]) -> Rhythm {
        let config = CompareConfig::default();
        let spec = compute_stft(samples, config.sample_rate, config.fft_size, config.hop_length);
        analyze_rhythm(&spec, config.hop_length, &config)
    }

    #[test]
    fn test_pulse_train_tempo() {
        let rhythm = rhythm_of(&pulse_train(120.0, 10.0));
        assert!((rhythm.tempo - 120.0).abs() < 6.0, "tempo {}", rhythm.tempo);
    }

    #[test]
    fn test_pulse_train_beats_are_regular() {
        let rhythm = rhythm_of(&pulse_train(120.0, 10.0));
        assert!(rhythm.beat_frames.len() >= 10);
        let mut intervals: Vec<usize> = rhythm.beat_frames.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort();
        let typical = intervals[intervals.len() / 2];
        assert!((19..=24).contains(&typical), "interval {}", typical);
    }

    #[test]
    fn test_silence_has_no_pulse() {
        let rhythm = rhythm_of(&vec![0.0; 22050 * 3]);
        assert_eq!(rhythm.tempo, 0.0);
        assert!(rhythm.beat_frames.is_empty());
    }

    #[test]
    fn test_sync_frames_takes_segment_medians() {
        let features: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32, 1.0]).collect();
        let synced = sync_frames(&features, &[3]);
        assert_eq!(synced.len(), 2);
        assert_eq!(synced[0], vec![1.0, 1.0]);
        assert_eq!(synced[1], vec![4.0, 1.0]);
    }

    #[test]
    fn test_beat_synchronize_pulse_train() {
        let config = CompareConfig::default();
        let signal = AudioSignal::new(pulse_train(120.0, 10.0), 22050);
        let total = crate::transform::frame_count(signal.len(), config.hop_length);
        let features: Vec<Vec<f32>> = (0..total).map(|t| vec![t as f32, 1.0]).collect();

        let (synced, times) = beat_synchronize(&features, &signal, &config);

        let beats = rhythm_of(signal.samples()).beat_frames;
        let mut boundaries = vec![0];
        boundaries.extend(beats.iter().copied().filter(|&b| b > 0 && b < total));
        boundaries.push(total);
        assert_eq!(times.len(), beats.len());
        assert_eq!(synced.len(), boundaries.len() - 1);
        assert!(synced.len() >= 10, "{} segments", synced.len());

        // Frame index column: median of s..e is (s + e - 1) / 2
        for (segment, span) in synced.iter().zip(boundaries.windows(2)) {
            assert_eq!(segment[0], (span[0] + span[1] - 1) as f32 / 2.0);
            assert_eq!(segment[1], 1.0);
        }

        let mut intervals: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let typical = intervals[intervals.len() / 2];
        assert!((0.43..0.57).contains(&typical), "beat interval {}", typical);
    }

    #[test]
    fn test_sync_frames_without_beats() {
        let features: Vec<Vec<f32>> = (0..4).map(|i| vec![i as f32]).collect();
        let synced = sync_frames(&features, &[]);
        assert_eq!(synced, vec![vec![1.5]]);
    }

    #[test]
    fn test_sync_frames_ignores_out_of_range_beats() {
        let features: Vec<Vec<f32>> = (0..4).map(|i| vec![i as f32]).collect();
        let synced = sync_frames(&features, &[0, 2, 2, 9]);
        assert_eq!(synced, vec![vec![0.5], vec![2.5]]);
    }
}
