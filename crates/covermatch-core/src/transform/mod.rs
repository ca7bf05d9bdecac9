//! Short-time spectral transform
//!
//! Centered, Hann-windowed STFT using rustfft. Every per-frame feature of a
//! track uses [`frame_count`] and [`centered_frame`] so that frame `t` always
//! covers the same stretch of audio, whatever the frame length.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Magnitude spectrogram
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Magnitude values [time_frame][frequency_bin]
    pub magnitudes: Vec<Vec<f32>>,
    /// Number of time frames
    pub num_frames: usize,
    /// Number of frequency bins (fft_size / 2 + 1)
    pub num_bins: usize,
    pub fft_size: usize,
    pub sample_rate: u32,
}

impl Spectrogram {
    /// Center frequency of an FFT bin in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }
}

/// Number of frames for a signal of `len` samples
pub fn frame_count(len: usize, hop: usize) -> usize {
    if len == 0 {
        return 0;
    }
    1 + len / hop
}

/// Copy the frame centered on `frame_idx * hop` into `out`, zero-padding past the edges
pub fn centered_frame(samples: &[f32], frame_idx: usize, hop: usize, out: &mut [f32]) {
    let half = out.len() / 2;
    let center = frame_idx * hop;
    for (k, slot) in out.iter_mut().enumerate() {
        let pos = (center + k).checked_sub(half);
        *slot = match pos {
            Some(p) if p < samples.len() => samples[p],
            _ => 0.0,
        };
    }
}

/// Compute the magnitude STFT
pub fn compute_stft(samples: &[f32], sample_rate: u32, fft_size: usize, hop: usize) -> Spectrogram {
    let num_frames = frame_count(samples.len(), hop);
    let num_bins = fft_size / 2 + 1;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let window = create_hann_window(fft_size);

    let mut frame = vec![0.0f32; fft_size];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
    let mut magnitudes = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        centered_frame(samples, frame_idx, hop, &mut frame);

        for ((slot, &s), &w) in buffer.iter_mut().zip(frame.iter()).zip(window.iter()) {
            *slot = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);

        magnitudes.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
    }

    Spectrogram {
        magnitudes,
        num_frames,
        num_bins,
        fft_size,
        sample_rate,
    }
}

/// Create Hann window
pub fn create_hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let window = create_hann_window(513);
        assert_eq!(window.len(), 513);
        assert!((window[0] - 0.0).abs() < 0.001);
        assert!((window[256] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(0, 512), 0);
        assert_eq!(frame_count(1, 512), 1);
        assert_eq!(frame_count(22050, 512), 44);
    }

    #[test]
    fn test_centered_frame_pads_edges() {
        let samples: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let mut out = vec![0.0; 4];
        centered_frame(&samples, 0, 4, &mut out);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 2.0]);
        centered_frame(&samples, 2, 4, &mut out);
        assert_eq!(out, vec![7.0, 8.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stft_peak_at_tone() {
        let sr = 22050;
        let samples: Vec<f32> = (0..sr)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sr as f32).sin())
            .collect();
        let spec = compute_stft(&samples, sr as u32, 2048, 512);
        assert_eq!(spec.num_frames, frame_count(samples.len(), 512));
        let mid = &spec.magnitudes[spec.num_frames / 2];
        let peak_bin = mid
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best })
            .0;
        assert!((spec.bin_frequency(peak_bin) - 1000.0).abs() < 15.0);
    }
}
