//! Sequence alignment: cost matrices, DTW and key-transposition search
//!
//! Feature sequences are `[frame][dimension]`. Chroma is compared with the
//! cosine distance, melody contours with the Euclidean distance.

use crate::error::{AlignmentError, TrackSide};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};


/// Frame-to-frame distances, row-major `rows x cols`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl CostMatrix {
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// `(i, j)` frame pairs from `(0, 0)` to `(rows - 1, cols - 1)`
pub type AlignmentPath = Vec<(usize, usize)>;

/// Result of a DTW run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtwAlignment {
    /// Accumulated cost at the end divided by the path length
    pub distance: f64,
    pub path: AlignmentPath,
}

impl DtwAlignment {
    pub fn similarity(&self) -> f64 {
        1.0 / (1.0 + self.distance)
    }
}

/// Frame distance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Euclidean,
}

impl Metric {
    fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                match (na > 0.0, nb > 0.0) {
                    (false, false) => 0.0,
                    (true, true) => (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0),
                    _ => 1.0,
                }
            }
        }
    }
}

/// Pairwise distances between every frame of `a` and every frame of `b`
pub fn distance_matrix(
    a: &[Vec<f32>],
    b: &[Vec<f32>],
    metric: Metric,
) -> Result<CostMatrix, AlignmentError> {
    let dims = match (a.first(), b.first()) {
        (Some(fa), Some(_)) => fa.len(),
        _ => return Err(AlignmentError::EmptySequence),
    };
    if let Some(frame) = a.iter().chain(b.iter()).find(|f| f.len() != dims) {
        return Err(AlignmentError::DimensionMismatch {
            left: dims,
            right: frame.len(),
        });
    }

    let cols = b.len();
    let mut data = vec![0.0f32; a.len() * cols];
    data.par_chunks_mut(cols)
        .zip(a.par_iter())
        .for_each(|(row, fa)| {
            for (slot, fb) in row.iter_mut().zip(b) {
                *slot = metric.distance(fa, fb);
            }
        });

    Ok(CostMatrix {
        rows: a.len(),
        cols,
        data,
    })
}

// Backtracking steps, stored per cell
const STEP_START: u8 = 0;
const STEP_DIAGONAL: u8 = 1;
const STEP_VERTICAL: u8 = 2;
const STEP_HORIZONTAL: u8 = 3;

/// Dynamic time warping over a cost matrix
///
/// Steps are `(+1, +1)`, `(+1, 0)` and `(0, +1)`, all unweighted. Equal
/// predecessors resolve to the diagonal, then the vertical, then the
/// horizontal step.
pub fn dtw(cost: &CostMatrix) -> Result<DtwAlignment, AlignmentError> {
    let (rows, cols) = (cost.rows, cost.cols);
    if rows == 0 || cols == 0 {
        return Err(AlignmentError::EmptySequence);
    }

    let mut steps = vec![STEP_START; rows * cols];
    let mut prev = vec![0.0f64; cols];
    let mut curr = vec![0.0f64; cols];

    for i in 0..rows {
        for j in 0..cols {
            let c = cost.get(i, j) as f64;
            let (best, step) = match (i, j) {
                (0, 0) => (0.0, STEP_START),
                (0, _) => (curr[j - 1], STEP_HORIZONTAL),
                (_, 0) => (prev[j], STEP_VERTICAL),
                _ => {
                    let mut best = (prev[j - 1], STEP_DIAGONAL);
                    if prev[j] < best.0 {
                        best = (prev[j], STEP_VERTICAL);
                    }
                    if curr[j - 1] < best.0 {
                        best = (curr[j - 1], STEP_HORIZONTAL);
                    }
                    best
                }
            };
            curr[j] = c + best;
            steps[i * cols + j] = step;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let total = prev[cols - 1];

    let mut path = Vec::with_capacity(rows + cols);
    let (mut i, mut j) = (rows - 1, cols - 1);
    loop {
        path.push((i, j));
        match steps[i * cols + j] {
            STEP_DIAGONAL => {
                i -= 1;
                j -= 1;
            }
            STEP_VERTICAL => i -= 1,
            STEP_HORIZONTAL => j -= 1,
            _ => break,
        }
    }
    path.reverse();

    Ok(DtwAlignment {
        distance: total / path.len() as f64,
        path,
    })
}

/// Rotate the pitch-class axis: `out[p] = in[(p + semitones) mod n]`
///
/// Negative shifts wrap around.
pub fn transpose_chroma(chroma: &[Vec<f32>], semitones: i32) -> Vec<Vec<f32>> {
    chroma
        .iter()
        .map(|frame| {
            let n = frame.len() as i32;
            if n == 0 {
                return Vec::new();
            }
            (0..n)
                .map(|p| frame[(p + semitones).rem_euclid(n) as usize])
                .collect()
        })
        .collect()
}

/// Best key shift of `b` against `a`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transposition {
    /// Semitones in `0..12`
    pub shift: usize,
    pub similarity: f64,
}

/// Try all 12 rotations of `b` (never `a`) and keep the most similar
///
/// Ties keep the smallest shift.
pub fn find_best_transposition(
    a: &[Vec<f32>],
    b: &[Vec<f32>],
) -> Result<Transposition, AlignmentError> {
    Ok(search_transpositions(a, b)?.transposition)
}

/// Chroma comparison at the best transposition
#[derive(Debug, Clone)]
pub struct ChromaComparison {
    pub transposition: Transposition,
    pub alignment: DtwAlignment,
    pub cost: CostMatrix,
}

impl ChromaComparison {
    pub fn similarity(&self) -> f64 {
        self.alignment.similarity()
    }
}

/// Key-invariant chroma comparison
pub fn compare_chroma(a: &[Vec<f32>], b: &[Vec<f32>]) -> Result<ChromaComparison, AlignmentError> {
    search_transpositions(a, b)
}

/// Shifts run one after another so at most two cost matrices are alive:
/// the current one and the best so far. Rows of each matrix are still
/// computed in parallel.
fn search_transpositions(a: &[Vec<f32>], b: &[Vec<f32>]) -> Result<ChromaComparison, AlignmentError> {
    let mut best: Option<ChromaComparison> = None;
    for shift in 0..12 {
        let shifted = transpose_chroma(b, shift as i32);
        let cost = distance_matrix(a, &shifted, Metric::Cosine)?;
        let alignment = dtw(&cost)?;
        let similarity = alignment.similarity();
        log::trace!("Transposition {:2}: similarity {:.4}", shift, similarity);

        if best.as_ref().map_or(true, |kept| similarity > kept.transposition.similarity) {
            best = Some(ChromaComparison {
                transposition: Transposition { shift, similarity },
                alignment,
                cost,
            });
        }
    }
    best.ok_or(AlignmentError::EmptySequence)
}

/// Melody comparison result
#[derive(Debug, Clone)]
pub struct MelodyComparison {
    pub similarity: f64,
    /// `None` when either contour had nothing to align
    pub alignment: Option<DtwAlignment>,
    pub cost: Option<CostMatrix>,
    /// Tracks whose contour has no voiced frame
    pub unvoiced: Vec<TrackSide>,
}

impl MelodyComparison {
    pub fn is_degenerate(&self) -> bool {
        !self.unvoiced.is_empty()
    }
}

/// Compare two melody contours by their shape relative to the median pitch
///
/// Contours without any voiced frame score 0.0 and are reported in
/// [`MelodyComparison::unvoiced`].
pub fn compare_melody(
    midi_a: &[f32],
    voiced_a: &[bool],
    midi_b: &[f32],
    voiced_b: &[bool],
) -> Result<MelodyComparison, AlignmentError> {
    if midi_a.is_empty() || midi_b.is_empty() {
        return Err(AlignmentError::EmptySequence);
    }

    let norm_a = relative_pitch(midi_a, voiced_a);
    let norm_b = relative_pitch(midi_b, voiced_b);

    let mut unvoiced = Vec::new();
    if norm_a.is_none() {
        unvoiced.push(TrackSide::Reference);
    }
    if norm_b.is_none() {
        unvoiced.push(TrackSide::Candidate);
    }

    let (norm_a, norm_b) = match (norm_a, norm_b) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Ok(MelodyComparison {
                similarity: 0.0,
                alignment: None,
                cost: None,
                unvoiced,
            })
        }
    };

    let cost = distance_matrix(&norm_a, &norm_b, Metric::Euclidean)?;
    let alignment = dtw(&cost)?;
    Ok(MelodyComparison {
        similarity: alignment.similarity(),
        alignment: Some(alignment),
        cost: Some(cost),
        unvoiced,
    })
}

/// MIDI contour minus the median voiced pitch, as 1-d frames; unvoiced frames are 0
fn relative_pitch(midi: &[f32], voiced: &[bool]) -> Option<Vec<Vec<f32>>> {
    let is_voiced = |i: usize| voiced.get(i).copied().unwrap_or(false) && midi[i] > 0.0;

    let mut pitches: Vec<f32> = (0..midi.len()).filter(|&i| is_voiced(i)).map(|i| midi[i]).collect();
    if pitches.is_empty() {
        return None;
    }
    pitches.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = pitches.len() / 2;
    let median = if pitches.len() % 2 == 0 {
        (pitches[mid - 1] + pitches[mid]) / 2.0
    } else {
        pitches[mid]
    };

    Some(
        (0..midi.len())
            .map(|i| vec![if is_voiced(i) { midi[i] - median } else { 0.0 }])
            .collect(),
    )
}
