//! covermatch core - melodic and harmonic similarity of audio recordings
//!
//! This crate compares two recordings to flag likely covers or plagiarism:
//! chroma with key-transposition search, melody contours, tempo, and the
//! locally similar segments of both tracks.

pub mod alignment;
pub mod audio;
pub mod comparison;
pub mod config;
pub mod error;
pub mod features;
pub mod job;
pub mod progress;
pub mod scoring;
pub mod segments;
pub mod service_config;
pub mod store;
pub mod transform;

pub use audio::{decode_bytes, decode_file, AudioSignal};
pub use comparison::{Comparator, ComparisonResult, Titles};
pub use config::{CompareConfig, MelodyMethod};
pub use error::{AlignmentError, ComparisonError, FeatureExtractionError, LoadError, Warning};
pub use features::{extract_features, FeatureSet};
pub use job::{CancellationToken, JobHandle, JobStatus, SubmitError, WorkerPool};
pub use progress::{LogSink, NoopSink, ProgressSink, ProgressUpdate};
pub use service_config::ServiceConfig;
pub use store::{AudioStore, FilesystemStore};

/// File stem of a path, for display
pub fn file_title(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("track")
        .to_string()
}
