//! Probabilistic YIN pitch tracking
//!
//! Per frame, the cumulative mean normalized difference function (CMND) is
//! thresholded at 100 levels weighted by a Beta(2, 18) prior, which turns
//! its troughs into pitch candidates with probabilities. A Viterbi pass over
//! voiced/unvoiced pitch states then picks the most likely contour.
//!
//! Reference: Mauch & Dixon (2014), "pYIN: A fundamental frequency estimator
//! using probabilistic threshold distributions".

use crate::transform::{centered_frame, frame_count};
use rustfft::{num_complex::Complex, FftPlanner};

const N_THRESHOLDS: usize = 100;
const BETA_A: i32 = 2;
const BETA_B: i32 = 18;
/// Weight given to the global minimum when no trough is under a threshold
const NO_TROUGH_PROB: f32 = 0.01;
const BINS_PER_SEMITONE: usize = 4;
/// Fastest pitch movement allowed between frames, octaves per second
const MAX_TRANSITION_RATE: f32 = 35.92;
const SWITCH_PROB: f32 = 0.01;
/// Frames quieter than this (RMS) are never voiced
pub const SILENCE_RMS: f32 = 1e-4;
const LOG_FLOOR: f32 = 1e-12;

/// Parameters of one tracking run
#[derive(Debug, Clone)]
pub struct PyinParams {
    pub sample_rate: u32,
    pub frame_length: usize,
    pub hop_length: usize,
    pub fmin: f32,
    pub fmax: f32,
}

/// A pitch candidate for one frame
#[derive(Debug, Clone, Copy)]
struct Candidate {
    freq: f32,
    prob: f32,
}

/// Track f0 over a whole signal; unvoiced frames report 0.0
pub fn track(samples: &[f32], params: &PyinParams) -> (Vec<f32>, Vec<bool>) {
    let num_frames = frame_count(samples.len(), params.hop_length);
    if num_frames == 0 {
        return (Vec::new(), Vec::new());
    }

    let n_pitch_bins = pitch_bin_count(params.fmin, params.fmax);
    let (candidates, silent) = frame_candidates(samples, params, num_frames);

    // Observation probabilities: voiced states carry candidate mass,
    // unvoiced states share what is left
    let observations: Vec<Vec<f32>> = candidates
        .iter()
        .map(|frame| {
            let mut obs = vec![0.0f32; 2 * n_pitch_bins];
            let mut voiced_prob = 0.0f32;
            for c in frame {
                if let Some(bin) = pitch_bin(c.freq, params.fmin, n_pitch_bins) {
                    obs[bin] += c.prob;
                    voiced_prob += c.prob;
                }
            }
            let unvoiced = (1.0 - voiced_prob.min(1.0)) / n_pitch_bins as f32;
            for slot in obs[n_pitch_bins..].iter_mut() {
                *slot = unvoiced;
            }
            obs
        })
        .collect();

    let max_step = max_bin_step(params);
    let states = viterbi(&observations, n_pitch_bins, max_step);

    let mut f0 = Vec::with_capacity(num_frames);
    let mut voiced = Vec::with_capacity(num_frames);
    for (t, &state) in states.iter().enumerate() {
        if state < n_pitch_bins && !silent[t] {
            f0.push(bin_frequency(state, params.fmin));
            voiced.push(true);
        } else {
            f0.push(0.0);
            voiced.push(false);
        }
    }

    (f0, voiced)
}

fn pitch_bin_count(fmin: f32, fmax: f32) -> usize {
    (12.0 * BINS_PER_SEMITONE as f32 * (fmax / fmin).log2()).ceil() as usize + 1
}

fn pitch_bin(freq: f32, fmin: f32, n_bins: usize) -> Option<usize> {
    if freq <= 0.0 || !freq.is_finite() {
        return None;
    }
    let pos = (12.0 * BINS_PER_SEMITONE as f32 * (freq / fmin).log2()).round();
    if pos < 0.0 || pos as usize >= n_bins {
        return None;
    }
    Some(pos as usize)
}

fn bin_frequency(bin: usize, fmin: f32) -> f32 {
    fmin * 2.0f32.powf(bin as f32 / (12 * BINS_PER_SEMITONE) as f32)
}

fn max_bin_step(params: &PyinParams) -> usize {
    let semitones_per_frame =
        MAX_TRANSITION_RATE * 12.0 * params.hop_length as f32 / params.sample_rate as f32;
    ((semitones_per_frame * BINS_PER_SEMITONE as f32).round() as usize).max(1)
}

/// Beta(2, 18) mass at each threshold 0.01 .. 1.00
fn threshold_weights() -> Vec<(f32, f32)> {
    let raw: Vec<(f32, f32)> = (1..=N_THRESHOLDS)
        .map(|k| {
            let theta = k as f32 / N_THRESHOLDS as f32;
            let density = theta.powi(BETA_A - 1) * (1.0 - theta).powi(BETA_B - 1);
            (theta, density)
        })
        .collect();
    let total: f32 = raw.iter().map(|(_, d)| d).sum();
    raw.into_iter().map(|(t, d)| (t, d / total)).collect()
}

/// Pitch candidates for every frame, plus a per-frame silence flag
fn frame_candidates(
    samples: &[f32],
    params: &PyinParams,
    num_frames: usize,
) -> (Vec<Vec<Candidate>>, Vec<bool>) {
    let frame_length = params.frame_length;
    let window = frame_length / 2;
    let sr = params.sample_rate as f32;
    let tau_min = ((sr / params.fmax).floor() as usize).max(2);
    let tau_max = ((sr / params.fmin).ceil() as usize).min(frame_length.saturating_sub(window + 1));

    let fft_len = (frame_length + window).next_power_of_two();
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);
    let weights = threshold_weights();

    let mut frame = vec![0.0f32; frame_length];
    let mut head = vec![Complex::new(0.0f32, 0.0); fft_len];
    let mut full = vec![Complex::new(0.0f32, 0.0); fft_len];
    let mut cumulative = vec![0.0f32; frame_length + 1];
    let mut cmnd = vec![1.0f32; tau_max + 2];

    let mut all_candidates = Vec::with_capacity(num_frames);
    let mut silent = Vec::with_capacity(num_frames);

    for t in 0..num_frames {
        centered_frame(samples, t, params.hop_length, &mut frame);

        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame_length as f32).sqrt();
        if rms < SILENCE_RMS || tau_min >= tau_max {
            all_candidates.push(Vec::new());
            silent.push(true);
            continue;
        }
        silent.push(false);

        // Cross term via FFT correlation of the head window against the frame
        for (k, slot) in head.iter_mut().enumerate() {
            *slot = Complex::new(if k < window { frame[k] } else { 0.0 }, 0.0);
        }
        for (k, slot) in full.iter_mut().enumerate() {
            *slot = Complex::new(if k < frame_length { frame[k] } else { 0.0 }, 0.0);
        }
        forward.process(&mut head);
        forward.process(&mut full);
        for (h, f) in head.iter_mut().zip(full.iter()) {
            *h = h.conj() * f;
        }
        inverse.process(&mut head);
        let scale = 1.0 / fft_len as f32;

        cumulative[0] = 0.0;
        for (k, &s) in frame.iter().enumerate() {
            cumulative[k + 1] = cumulative[k] + s * s;
        }
        let energy_head = cumulative[window];

        // Difference function folded straight into the CMND
        cmnd[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..=tau_max + 1 {
            let energy_lag = cumulative[tau + window] - cumulative[tau];
            let cross = head[tau].re * scale;
            let diff = (energy_head + energy_lag - 2.0 * cross).max(0.0);
            running += diff;
            cmnd[tau] = if running > 0.0 {
                diff * tau as f32 / running
            } else {
                1.0
            };
        }

        all_candidates.push(candidates_from_cmnd(&cmnd, tau_min, tau_max, sr, &weights));
    }

    (all_candidates, silent)
}

/// Turn CMND troughs into weighted pitch candidates
fn candidates_from_cmnd(
    cmnd: &[f32],
    tau_min: usize,
    tau_max: usize,
    sample_rate: f32,
    weights: &[(f32, f32)],
) -> Vec<Candidate> {
    let troughs: Vec<usize> = (tau_min..=tau_max)
        .filter(|&tau| cmnd[tau] < cmnd[tau - 1] && cmnd[tau] <= cmnd[tau + 1])
        .collect();

    if troughs.is_empty() {
        return Vec::new();
    }

    let global_min = troughs
        .iter()
        .enumerate()
        .fold((0, f32::MAX), |best, (i, &tau)| {
            if cmnd[tau] < best.1 {
                (i, cmnd[tau])
            } else {
                best
            }
        })
        .0;

    let mut probs = vec![0.0f32; troughs.len()];
    for &(theta, weight) in weights {
        match troughs.iter().position(|&tau| cmnd[tau] < theta) {
            Some(i) => probs[i] += weight,
            None => probs[global_min] += weight * NO_TROUGH_PROB,
        }
    }

    troughs
        .iter()
        .zip(probs)
        .filter(|(_, p)| *p > 0.0)
        .map(|(&tau, prob)| {
            let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            let denom = a - 2.0 * b + c;
            let shift = if denom.abs() > 1e-12 {
                (0.5 * (a - c) / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            Candidate {
                freq: sample_rate / (tau as f32 + shift),
                prob,
            }
        })
        .collect()
}

/// Most likely state sequence; states `[0, n)` are voiced pitch bins, `[n, 2n)` unvoiced
fn viterbi(observations: &[Vec<f32>], n_bins: usize, max_step: usize) -> Vec<usize> {
    let n_states = 2 * n_bins;
    let num_frames = observations.len();

    // Triangular pitch transition, normalized per source bin
    let tri: Vec<f32> = (0..=max_step).map(|d| (max_step + 1 - d) as f32).collect();
    let row_log_norm: Vec<f32> = (0..n_bins)
        .map(|b| {
            let lo = b.saturating_sub(max_step);
            let hi = (b + max_step).min(n_bins - 1);
            let total: f32 = (lo..=hi).map(|b2| tri[b.abs_diff(b2)]).sum();
            total.ln()
        })
        .collect();
    let log_tri: Vec<f32> = tri.iter().map(|v| v.ln()).collect();
    let log_stay = (1.0 - SWITCH_PROB).ln();
    let log_switch = SWITCH_PROB.ln();

    let log_obs = |t: usize, s: usize| observations[t][s].max(LOG_FLOOR).ln();

    let start = -(n_states as f32).ln();
    let mut delta: Vec<f32> = (0..n_states).map(|s| start + log_obs(0, s)).collect();
    let mut next = vec![f32::NEG_INFINITY; n_states];
    let mut backpointers = vec![vec![0u32; n_states]; num_frames];

    for t in 1..num_frames {
        for target in 0..n_states {
            let target_voiced = target < n_bins;
            let b2 = target % n_bins;
            let lo = b2.saturating_sub(max_step);
            let hi = (b2 + max_step).min(n_bins - 1);

            let mut best = f32::NEG_INFINITY;
            let mut best_state = 0usize;
            for source_voiced in [true, false] {
                let voicing = if source_voiced == target_voiced {
                    log_stay
                } else {
                    log_switch
                };
                let offset = if source_voiced { 0 } else { n_bins };
                for b in lo..=hi {
                    let source = offset + b;
                    let score =
                        delta[source] + log_tri[b.abs_diff(b2)] - row_log_norm[b] + voicing;
                    if score > best {
                        best = score;
                        best_state = source;
                    }
                }
            }
            next[target] = best + log_obs(t, target);
            backpointers[t][target] = best_state as u32;
        }
        std::mem::swap(&mut delta, &mut next);
    }

    let mut state = delta
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (s, &v)| if v > best.1 { (s, v) } else { best })
        .0;

    let mut path = vec![0usize; num_frames];
    for t in (0..num_frames).rev() {
        path[t] = state;
        if t > 0 {
            state = backpointers[t][state] as usize;
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn params() -> PyinParams {
        PyinParams {
            sample_rate: 22050,
            frame_length: 2048,
            hop_length: 512,
            fmin: 65.406,
            fmax: 2093.005,
        }
    }

    fn tone(freq: f32, seconds: f32) -> Vec<f32> {
        (0..(seconds * 22050.0) as usize)
            .map(|i| 0.8 * (2.0 * PI * freq * i as f32 / 22050.0).sin())
            .collect()
    }

    #[test]
    fn test_threshold_weights_sum_to_one() {
        let total: f32 = threshold_weights().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_tracks_steady_tone() {
        let (f0, voiced) = track(&tone(220.0, 1.0), &params());
        assert_eq!(f0.len(), voiced.len());
        let mid = f0.len() / 2;
        assert!(voiced[mid]);
        // Quarter-semitone grid: within 1.5% of the true pitch
        assert!((f0[mid] - 220.0).abs() / 220.0 < 0.015, "got {}", f0[mid]);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let (f0, voiced) = track(&vec![0.0; 22050], &params());
        assert!(voiced.iter().all(|v| !v));
        assert!(f0.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_pitch_bin_bounds() {
        let n = pitch_bin_count(65.406, 2093.005);
        assert_eq!(pitch_bin(65.406, 65.406, n), Some(0));
        assert_eq!(pitch_bin(30.0, 65.406, n), None);
        assert_eq!(pitch_bin(0.0, 65.406, n), None);
    }
}
