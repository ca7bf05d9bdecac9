//! Audio resampling with rubato's FFT resampler

use crate::error::LoadError;
use rubato::{FftFixedIn, Resampler};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample mono audio to the target sample rate
///
/// The resampler's output delay is trimmed so the result starts aligned with
/// the input and has `len * to / from` samples.
pub fn resample_to_target(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, LoadError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| LoadError::Resample(e.to_string()))?;

    let expected_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected_len + delay);

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= samples.len() {
        let needed = resampler.input_frames_next();
        let chunk = [&samples[pos..pos + needed]];
        let out = resampler
            .process(&chunk[..], None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
        pos += needed;
    }

    if pos < samples.len() {
        let chunk = [&samples[pos..]];
        let out = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the samples still held back by the resampler delay
    while output.len() < expected_len + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let start = delay.min(output.len());
    let mut resampled = output.split_off(start);
    resampled.truncate(expected_len);

    log::debug!(
        "Resampled {} samples @ {}Hz -> {} samples @ {}Hz",
        samples.len(),
        from_rate,
        resampled.len(),
        to_rate
    );

    Ok(resampled)
}
