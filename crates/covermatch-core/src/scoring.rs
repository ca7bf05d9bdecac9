//! Weighted aggregation of component similarities into a verdict

use serde::{Deserialize, Serialize};
use std::fmt;

/// Component weights; they sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub chroma_harmony: f64,
    pub melody_contour: f64,
    pub tempo: f64,
}

pub const WEIGHTS: Weights = Weights {
    chroma_harmony: 0.5,
    melody_contour: 0.4,
    tempo: 0.1,
};

/// Per-component similarities in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub chroma_harmony: f64,
    pub melody_contour: f64,
    pub tempo: f64,
}

/// Banded similarity level, by percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityLevel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Moderate,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl SimilarityLevel {
    /// Inclusive lower bounds at 80, 60, 40 and 20 percent
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            SimilarityLevel::VeryHigh
        } else if percentage >= 60.0 {
            SimilarityLevel::High
        } else if percentage >= 40.0 {
            SimilarityLevel::Moderate
        } else if percentage >= 20.0 {
            SimilarityLevel::Low
        } else {
            SimilarityLevel::VeryLow
        }
    }

    pub fn verdict(&self) -> &'static str {
        match self {
            SimilarityLevel::VeryHigh => "Highly similar - possible plagiarism or cover",
            SimilarityLevel::High => "Significant similarity detected",
            SimilarityLevel::Moderate => "Some similarities found",
            SimilarityLevel::Low => "Minor similarities only",
            SimilarityLevel::VeryLow => "No significant similarity",
        }
    }
}

impl fmt::Display for SimilarityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimilarityLevel::VeryHigh => "Very High",
            SimilarityLevel::High => "High",
            SimilarityLevel::Moderate => "Moderate",
            SimilarityLevel::Low => "Low",
            SimilarityLevel::VeryLow => "Very Low",
        };
        f.write_str(name)
    }
}

/// Aggregated similarity of two tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSimilarity {
    pub overall_similarity_score: f64,
    pub similarity_percentage: f64,
    pub similarity_level: SimilarityLevel,
    pub verdict: String,
    pub component_scores: ComponentScores,
    pub weights: Weights,
}

/// Tempo ratio `a / b`, 1.0 when `b` is zero or either tempo is unusable
pub fn tempo_ratio(tempo_a: f32, tempo_b: f32) -> f64 {
    let ratio = tempo_a as f64 / tempo_b as f64;
    if tempo_b <= 0.0 || !ratio.is_finite() {
        1.0
    } else {
        ratio
    }
}

/// Combine chroma, melody and tempo into an overall score
///
/// Similarities are clamped to `[0, 1]`; the tempo sub-score is
/// `1 / (1 + |ratio - 1|)`.
pub fn overall_similarity(chroma_similarity: f64, melody_similarity: f64, tempo_ratio: f64) -> OverallSimilarity {
    let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let ratio = if tempo_ratio.is_finite() { tempo_ratio } else { 1.0 };

    let components = ComponentScores {
        chroma_harmony: clamp(chroma_similarity),
        melody_contour: clamp(melody_similarity),
        tempo: 1.0 / (1.0 + (ratio - 1.0).abs()),
    };

    let score = WEIGHTS.chroma_harmony * components.chroma_harmony
        + WEIGHTS.melody_contour * components.melody_contour
        + WEIGHTS.tempo * components.tempo;
    let score = score.clamp(0.0, 1.0);
    let percentage = score * 100.0;
    let level = SimilarityLevel::from_percentage(percentage);

    OverallSimilarity {
        overall_similarity_score: score,
        similarity_percentage: percentage,
        similarity_level: level,
        verdict: level.verdict().to_string(),
        component_scores: components,
        weights: WEIGHTS,
    }
}
