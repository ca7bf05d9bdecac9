//! Full two-track comparison
//!
//! Decodes and analyzes both tracks in parallel, then runs the chroma
//! transposition search, melody DTW, segment detection and scoring, and
//! renders everything into a [`ComparisonResult`].

use crate::alignment::{compare_chroma, compare_melody, AlignmentPath, CostMatrix};
use crate::audio::{decode_bytes, AudioSignal};
use crate::config::CompareConfig;
use crate::error::{ComparisonError, DegenerateReason, TrackSide, Warning};
use crate::features::{extract_features, FeatureSet};
use crate::job::{CancellationToken, JobStatus};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::scoring::{overall_similarity, tempo_ratio, OverallSimilarity};
use crate::segments::{find_similar_segments, SimilarSegment};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Instant;

/// Display names of the two tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Titles {
    pub reference: String,
    pub candidate: String,
}

impl Default for Titles {
    fn default() -> Self {
        Self::new("Track 1", "Track 2")
    }
}

impl Titles {
    pub fn new(reference: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            candidate: candidate.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub title: String,
    /// Seconds
    pub duration: f64,
    pub tempo: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaAnalysis {
    /// Semitones the candidate sits above the reference, `0..12`
    pub transposition_semitones: usize,
    pub similarity_score: f64,
    pub dtw_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MelodyAnalysis {
    pub similarity_score: f64,
    /// Absent when a contour had no voiced frame
    pub dtw_distance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoAnalysis {
    pub track1_tempo: f32,
    pub track2_tempo: f32,
    pub tempo_ratio: f64,
}

/// Matrices, paths and features behind a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawData {
    pub chroma_cost_matrix: CostMatrix,
    pub chroma_dtw_path: AlignmentPath,
    pub melody_cost_matrix: Option<CostMatrix>,
    pub melody_dtw_path: Option<AlignmentPath>,
    pub features1: FeatureSet,
    pub features2: FeatureSet,
}

/// Everything known about one comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub track1: TrackSummary,
    pub track2: TrackSummary,
    pub overall_similarity: OverallSimilarity,
    pub chroma_analysis: ChromaAnalysis,
    pub melody_analysis: MelodyAnalysis,
    /// Best first
    pub similar_segments: Vec<SimilarSegment>,
    pub tempo_analysis: TempoAnalysis,
    pub summary: String,
    pub warnings: Vec<Warning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<RawData>,
}

impl ComparisonResult {
    /// The same result without the bulky matrices and features
    pub fn without_raw_data(self) -> Self {
        Self {
            raw_data: None,
            ..self
        }
    }
}

/// Runs comparisons with a fixed configuration
#[derive(Debug, Clone)]
pub struct Comparator {
    config: CompareConfig,
}

impl Comparator {
    pub fn new(config: CompareConfig) -> Result<Self, ComparisonError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// Compare two encoded audio buffers
    pub fn compare_tracks(
        &self,
        reference: &[u8],
        candidate: &[u8],
        titles: &Titles,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ComparisonResult, ComparisonError> {
        report(progress, 5, "Loading audio");
        log::info!("Comparing '{}' with '{}'", titles.reference, titles.candidate);
        cancel.check()?;

        let target_sr = self.config.sample_rate;
        let analyze = |bytes: &[u8], track: TrackSide| -> Result<FeatureSet, ComparisonError> {
            let signal = decode_bytes(bytes, target_sr).map_err(|source| ComparisonError::Load { track, source })?;
            self.extract(&signal, track)
        };

        report(progress, 10, "Extracting features");
        let (features_a, features_b) = rayon::join(
            || analyze(reference, TrackSide::Reference),
            || analyze(candidate, TrackSide::Candidate),
        );

        self.run(features_a?, features_b?, titles, progress, cancel)
    }

    /// Compare two decoded signals
    pub fn compare_signals(
        &self,
        reference: &AudioSignal,
        candidate: &AudioSignal,
        titles: &Titles,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ComparisonResult, ComparisonError> {
        cancel.check()?;
        report(progress, 10, "Extracting features");
        let (features_a, features_b) = rayon::join(
            || self.extract(reference, TrackSide::Reference),
            || self.extract(candidate, TrackSide::Candidate),
        );
        self.run(features_a?, features_b?, titles, progress, cancel)
    }

    /// Compare two previously extracted feature sets
    pub fn compare_features(
        &self,
        reference: FeatureSet,
        candidate: FeatureSet,
        titles: &Titles,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ComparisonResult, ComparisonError> {
        self.run(reference, candidate, titles, progress, cancel)
    }

    fn extract(&self, signal: &AudioSignal, track: TrackSide) -> Result<FeatureSet, ComparisonError> {
        let start = Instant::now();
        let features = extract_features(signal, &self.config)
            .map_err(|source| ComparisonError::FeatureExtraction { track, source })?;
        log::debug!(
            "{}: {:.1}s analyzed in {:?}",
            track,
            features.duration,
            start.elapsed()
        );
        Ok(features)
    }

    fn run(
        &self,
        features_a: FeatureSet,
        features_b: FeatureSet,
        titles: &Titles,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ComparisonResult, ComparisonError> {
        cancel.check()?;
        if features_a.hop_length != features_b.hop_length || features_a.sample_rate != features_b.sample_rate {
            return Err(ComparisonError::InvalidConfig(format!(
                "feature frame rates differ: {}/{} vs {}/{}",
                features_a.hop_length, features_a.sample_rate, features_b.hop_length, features_b.sample_rate
            )));
        }

        let mut warnings = Vec::new();
        for (track, features) in [(TrackSide::Reference, &features_a), (TrackSide::Candidate, &features_b)] {
            if features.is_silent() {
                warnings.push(Warning::DegenerateInput {
                    track,
                    reason: DegenerateReason::Silent,
                });
            }
        }

        report(progress, 40, "Comparing chroma with transposition search");
        let chroma = compare_chroma(&features_a.chroma, &features_b.chroma)?;
        log::debug!(
            "Chroma: shift {} similarity {:.4}",
            chroma.transposition.shift,
            chroma.similarity()
        );

        cancel.check()?;
        report(progress, 70, "Comparing melody contours");
        let melody = compare_melody(
            &features_a.midi,
            &features_a.voiced,
            &features_b.midi,
            &features_b.voiced,
        )?;
        for &track in &melody.unvoiced {
            warnings.push(Warning::DegenerateInput {
                track,
                reason: DegenerateReason::Unvoiced,
            });
        }

        cancel.check()?;
        report(progress, 85, "Finding similar segments");
        let segments = find_similar_segments(
            &chroma.cost,
            features_a.hop_length,
            features_a.sample_rate,
            self.config.segment_window,
            self.config.detector_threshold,
            self.config.report_threshold,
        );

        report(progress, 95, "Computing overall similarity");
        let ratio = tempo_ratio(features_a.tempo, features_b.tempo);
        let overall = overall_similarity(chroma.similarity(), melody.similarity, ratio);

        for warning in &warnings {
            log::warn!("{}", warning);
        }

        let summary = render_summary(
            titles,
            &overall,
            chroma.transposition.shift,
            features_a.tempo,
            features_b.tempo,
            &segments,
            self.config.summary_segments,
        );

        cancel.check()?;

        let result = ComparisonResult {
            track1: TrackSummary {
                title: titles.reference.clone(),
                duration: features_a.duration,
                tempo: features_a.tempo,
            },
            track2: TrackSummary {
                title: titles.candidate.clone(),
                duration: features_b.duration,
                tempo: features_b.tempo,
            },
            chroma_analysis: ChromaAnalysis {
                transposition_semitones: chroma.transposition.shift,
                similarity_score: chroma.similarity(),
                dtw_distance: chroma.alignment.distance,
            },
            melody_analysis: MelodyAnalysis {
                similarity_score: melody.similarity,
                dtw_distance: melody.alignment.as_ref().map(|a| a.distance),
            },
            tempo_analysis: TempoAnalysis {
                track1_tempo: features_a.tempo,
                track2_tempo: features_b.tempo,
                tempo_ratio: ratio,
            },
            overall_similarity: overall,
            similar_segments: segments,
            summary,
            warnings,
            raw_data: Some(RawData {
                chroma_cost_matrix: chroma.cost,
                chroma_dtw_path: chroma.alignment.path,
                melody_cost_matrix: melody.cost,
                melody_dtw_path: melody.alignment.map(|a| a.path),
                features1: features_a,
                features2: features_b,
            }),
        };

        log::info!(
            "Similarity {:.1}% ({})",
            result.overall_similarity.similarity_percentage,
            result.overall_similarity.similarity_level
        );
        progress.publish(ProgressUpdate::new(JobStatus::Completed, 100, "Comparison complete"));
        Ok(result)
    }
}

fn report(progress: &dyn ProgressSink, percent: u8, message: &str) {
    progress.publish(ProgressUpdate::new(JobStatus::Processing, percent, message));
}

/// Describe a transposition shift as a direction from the reference
pub fn describe_key_shift(shift: usize, reference: &str, candidate: &str) -> String {
    let shift = shift % 12;
    if shift == 0 {
        return "Key Analysis: Same key".to_string();
    }
    let (steps, direction) = if shift <= 6 { (shift, "up") } else { (12 - shift, "down") };
    let unit = if steps == 1 { "semitone" } else { "semitones" };
    format!(
        "Key Analysis: {} is {} {} {} from {}",
        candidate, steps, unit, direction, reference
    )
}

/// Plain-text report of a comparison
pub fn render_summary(
    titles: &Titles,
    overall: &OverallSimilarity,
    shift: usize,
    tempo_a: f32,
    tempo_b: f32,
    segments: &[SimilarSegment],
    max_segments: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "=== Similarity Analysis: {} vs {} ===\n",
        titles.reference, titles.candidate
    );

    let _ = writeln!(out, "Overall Similarity: {:.1}%", overall.similarity_percentage);
    let _ = writeln!(out, "Level: {}", overall.similarity_level);
    let _ = writeln!(out, "Verdict: {}\n", overall.verdict);

    let scores = &overall.component_scores;
    let _ = writeln!(out, "Component Analysis:");
    let _ = writeln!(out, "  - Harmony/Chroma: {:.1}%", scores.chroma_harmony * 100.0);
    let _ = writeln!(out, "  - Melody Contour: {:.1}%", scores.melody_contour * 100.0);
    let _ = writeln!(out, "  - Tempo Match: {:.1}%\n", scores.tempo * 100.0);

    let _ = writeln!(out, "{}", describe_key_shift(shift, &titles.reference, &titles.candidate));
    let _ = writeln!(out, "Tempo: {:.1} BPM vs {:.1} BPM\n", tempo_a, tempo_b);

    if segments.is_empty() {
        out.push_str("No highly similar segments found.");
    } else {
        let _ = write!(out, "Found {} similar segments:", segments.len());
        for (i, seg) in segments.iter().take(max_segments).enumerate() {
            let _ = write!(
                out,
                "\n  {}. {} [{:.1}s - {:.1}s] ↔ {} [{:.1}s - {:.1}s] (similarity: {:.1}%)",
                i + 1,
                titles.reference,
                seg.track1_start_time,
                seg.track1_end_time,
                titles.candidate,
                seg.track2_start_time,
                seg.track2_end_time,
                seg.similarity_score * 100.0
            );
        }
    }
    out
}
