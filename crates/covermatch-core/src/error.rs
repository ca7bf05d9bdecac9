//! Error taxonomy for the comparison pipeline
//!
//! Each stage returns its own typed error so synchronous callers of a single
//! stage can match on it; the orchestrator folds them into [`ComparisonError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Audio could not be turned into a signal
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("audio source not found: {0}")]
    NotFound(String),

    #[error("audio buffer is empty")]
    Empty,

    #[error("unsupported audio format")]
    UnsupportedFormat,

    #[error("corrupt {format} stream: {message}")]
    Corrupt { format: &'static str, message: String },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("I/O error while reading audio: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Transient failures worth retrying (the bytes may be readable next time)
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::Io(_))
    }

    pub(crate) fn corrupt(format: &'static str, err: impl fmt::Display) -> Self {
        LoadError::Corrupt {
            format,
            message: err.to_string(),
        }
    }
}

/// Decoding succeeded but a feature could not be computed
#[derive(Debug, Error)]
pub enum FeatureExtractionError {
    #[error("signal has no samples")]
    EmptySignal,

    #[error("invalid extraction parameter: {0}")]
    InvalidParameter(String),
}

/// Two feature sequences cannot be aligned
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("feature dimensionality mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("cannot align an empty feature sequence")]
    EmptySequence,
}

/// Any failure of a full comparison
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("failed to load {track}: {source}")]
    Load {
        track: TrackSide,
        #[source]
        source: LoadError,
    },

    #[error("feature extraction failed for {track}: {source}")]
    FeatureExtraction {
        track: TrackSide,
        #[source]
        source: FeatureExtractionError,
    },

    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("comparison was cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("comparison worker panicked")]
    WorkerPanicked,
}

impl ComparisonError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ComparisonError::Load { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Which side of a comparison an error or warning refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSide {
    Reference,
    Candidate,
}

impl fmt::Display for TrackSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSide::Reference => write!(f, "reference track"),
            TrackSide::Candidate => write!(f, "candidate track"),
        }
    }
}

/// Why a track produced degenerate features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateReason {
    /// Every sample is zero
    Silent,
    /// No frame carries a detectable pitch
    Unvoiced,
}

/// Non-fatal conditions surfaced alongside a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    DegenerateInput {
        track: TrackSide,
        reason: DegenerateReason,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DegenerateInput { track, reason } => match reason {
                DegenerateReason::Silent => write!(f, "{} is silent", track),
                DegenerateReason::Unvoiced => write!(f, "{} has no voiced melody", track),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_retryable() {
        let io = LoadError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr"));
        assert!(io.is_retryable());
        assert!(!LoadError::Empty.is_retryable());
        assert!(!LoadError::corrupt("wav", "bad header").is_retryable());

        let wrapped = ComparisonError::Load {
            track: TrackSide::Candidate,
            source: io,
        };
        assert!(wrapped.is_retryable());
        assert!(!ComparisonError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_track() {
        let err = ComparisonError::FeatureExtraction {
            track: TrackSide::Reference,
            source: FeatureExtractionError::EmptySignal,
        };
        assert_eq!(
            err.to_string(),
            "feature extraction failed for reference track: signal has no samples"
        );
    }
}
