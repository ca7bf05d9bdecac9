//! Localized similar-segment detection on a cost matrix
//!
//! A square window slides over the similarity matrix `1 / (1 + cost)` with a
//! half-window stride. Windows whose mean similarity clears the detector
//! threshold become regions; regions are mapped to seconds and filtered again
//! by the report threshold before reaching a result.

use crate::alignment::CostMatrix;
use serde::{Deserialize, Serialize};

/// A matching window, in frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub track1_start_frame: usize,
    pub track1_end_frame: usize,
    pub track2_start_frame: usize,
    pub track2_end_frame: usize,
    /// Mean similarity inside the window
    pub similarity_score: f64,
    pub max_similarity: f64,
}

/// A matching window with time positions on both tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarSegment {
    pub track1_start_frame: usize,
    pub track1_end_frame: usize,
    pub track2_start_frame: usize,
    pub track2_end_frame: usize,
    pub track1_start_time: f64,
    pub track1_end_time: f64,
    pub track2_start_time: f64,
    pub track2_end_time: f64,
    pub similarity_score: f64,
    pub max_similarity: f64,
}

/// Windows of mean similarity strictly above `threshold`, best first
///
/// Start positions run `0, s, 2s, ..` while below `frames - window`, with
/// `s = max(window / 2, 1)`; sequences no longer than the window yield nothing.
pub fn local_alignment_regions(cost: &CostMatrix, window: usize, threshold: f64) -> Vec<Region> {
    if window == 0 {
        return Vec::new();
    }
    let stride = (window / 2).max(1);
    let area = (window * window) as f64;

    // Row-major similarity, computed once
    let similarity: Vec<f64> = cost.data.iter().map(|&c| 1.0 / (1.0 + c as f64)).collect();

    let mut regions = Vec::new();
    for i in (0..cost.rows.saturating_sub(window)).step_by(stride) {
        for j in (0..cost.cols.saturating_sub(window)).step_by(stride) {
            let mut sum = 0.0;
            let mut max = f64::MIN;
            for row in i..i + window {
                let start = row * cost.cols + j;
                for &v in &similarity[start..start + window] {
                    sum += v;
                    max = max.max(v);
                }
            }
            let mean = sum / area;
            if mean > threshold {
                regions.push(Region {
                    track1_start_frame: i,
                    track1_end_frame: i + window,
                    track2_start_frame: j,
                    track2_end_frame: j + window,
                    similarity_score: mean,
                    max_similarity: max,
                });
            }
        }
    }

    // Stable: equal scores keep scan order
    regions.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    regions
}

/// Attach second positions (`frame * hop / sample_rate`) to regions
pub fn map_regions_to_time(regions: &[Region], hop_length: usize, sample_rate: u32) -> Vec<SimilarSegment> {
    let to_seconds = |frame: usize| frame as f64 * hop_length as f64 / sample_rate as f64;
    regions
        .iter()
        .map(|r| SimilarSegment {
            track1_start_frame: r.track1_start_frame,
            track1_end_frame: r.track1_end_frame,
            track2_start_frame: r.track2_start_frame,
            track2_end_frame: r.track2_end_frame,
            track1_start_time: to_seconds(r.track1_start_frame),
            track1_end_time: to_seconds(r.track1_end_frame),
            track2_start_time: to_seconds(r.track2_start_frame),
            track2_end_time: to_seconds(r.track2_end_frame),
            similarity_score: r.similarity_score,
            max_similarity: r.max_similarity,
        })
        .collect()
}

/// Detection, time mapping and the report filter (`score >= report_threshold`)
pub fn find_similar_segments(
    cost: &CostMatrix,
    hop_length: usize,
    sample_rate: u32,
    window: usize,
    detector_threshold: f64,
    report_threshold: f64,
) -> Vec<SimilarSegment> {
    let regions = local_alignment_regions(cost, window, detector_threshold);
    let segments: Vec<SimilarSegment> = map_regions_to_time(&regions, hop_length, sample_rate)
        .into_iter()
        .filter(|s| s.similarity_score >= report_threshold)
        .collect();
    log::debug!(
        "Segments: {} regions above {}, {} reported",
        regions.len(),
        detector_threshold,
        segments.len()
    );
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform(rows: usize, cols: usize, value: f32) -> CostMatrix {
        CostMatrix {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    #[test]
    fn test_zero_cost_windows() {
        let regions = local_alignment_regions(&uniform(120, 120, 0.0), 50, 0.7);
        // Starts 0, 25, 50 on each axis (75 is not < 70)
        assert_eq!(regions.len(), 9);
        assert!(regions.iter().all(|r| r.similarity_score == 1.0));
        assert_eq!(regions[0].track1_start_frame, 0);
        assert_eq!(regions[0].track2_end_frame, 50);
    }

    #[test]
    fn test_threshold_is_strict() {
        // 1 / (1 + 1) = 0.5, exact in binary
        assert_eq!(local_alignment_regions(&uniform(60, 60, 1.0), 50, 0.5).len(), 0);
        assert_eq!(local_alignment_regions(&uniform(60, 60, 1.0), 50, 0.49).len(), 1);
    }

    #[test]
    fn test_short_sequences_yield_nothing() {
        assert!(local_alignment_regions(&uniform(50, 200, 0.0), 50, 0.7).is_empty());
        assert!(local_alignment_regions(&uniform(30, 30, 0.0), 50, 0.7).is_empty());
    }

    #[test]
    fn test_regions_sorted_descending() {
        let mut cost = uniform(100, 60, 0.3);
        // Make the lower rows a closer match
        for i in 40..100 {
            for j in 0..60 {
                cost.data[i * 60 + j] = 0.0;
            }
        }
        let regions = local_alignment_regions(&cost, 20, 0.7);
        assert!(!regions.is_empty());
        for w in regions.windows(2) {
            assert!(w[0].similarity_score >= w[1].similarity_score);
        }
        assert!(regions[0].track1_start_frame >= 40);
    }

    #[test]
    fn test_window_of_one_uses_stride_one() {
        let regions = local_alignment_regions(&uniform(4, 4, 0.0), 1, 0.5);
        assert_eq!(regions.len(), 9);
    }

    #[test]
    fn test_time_mapping() {
        let regions = local_alignment_regions(&uniform(120, 120, 0.0), 50, 0.7);
        let segments = map_regions_to_time(&regions, 512, 22050);
        let s = segments.iter().find(|s| s.track1_start_frame == 25).unwrap();
        assert_relative_eq!(s.track1_start_time, 25.0 * 512.0 / 22050.0);
        assert_relative_eq!(s.track1_end_time, 75.0 * 512.0 / 22050.0);
    }

    #[test]
    fn test_report_filter_is_inclusive() {
        // Mean similarity exactly 0.5
        let cost = uniform(60, 60, 1.0);
        assert_eq!(find_similar_segments(&cost, 512, 22050, 50, 0.4, 0.5).len(), 1);
        assert_eq!(find_similar_segments(&cost, 512, 22050, 50, 0.4, 0.51).len(), 0);
    }
}
