//! Batch comparison of many pairs on a worker pool
//!
//! Jobs hand back only the overall score, and finished jobs are collected
//! while later pairs are still being submitted, so memory stays bounded by
//! the pool's `max_pending` rather than the length of the pairs file.

use crate::output::BatchEntry;
use covermatch_core::scoring::OverallSimilarity;
use covermatch_core::{
    file_title, AudioStore, CancellationToken, Comparator, JobHandle, LogSink, NoopSink,
    ProgressSink, SubmitError, Titles, WorkerPool,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SATURATED_BACKOFF: Duration = Duration::from_millis(200);

/// One comparison requested by the pairs file
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub reference: String,
    pub candidate: String,
    pub titles: Titles,
}

/// Parse `reference,candidate[,title_a,title_b]` lines; `#` starts a comment
pub fn parse_pairs(content: &str) -> Vec<Pair> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [a, b] if !a.is_empty() && !b.is_empty() => Some(Pair {
                    reference: a.to_string(),
                    candidate: b.to_string(),
                    titles: Titles::new(file_title(Path::new(a)), file_title(Path::new(b))),
                }),
                [a, b, title_a, title_b] if !a.is_empty() && !b.is_empty() => Some(Pair {
                    reference: a.to_string(),
                    candidate: b.to_string(),
                    titles: Titles::new(*title_a, *title_b),
                }),
                _ => {
                    log::warn!("Skipping malformed line: {}", line);
                    None
                }
            }
        })
        .collect()
}

struct InFlight {
    reference: String,
    candidate: String,
    handle: JobHandle<OverallSimilarity>,
}

impl InFlight {
    fn finish(self) -> BatchEntry {
        let id = self.handle.id();
        match self.handle.wait() {
            Ok(overall) => BatchEntry::completed(id, &self.reference, &self.candidate, &overall),
            Err(e) => BatchEntry::failed(id, &self.reference, &self.candidate, e),
        }
    }
}

/// Compare every pair and return one entry per pair
///
/// Pairs whose audio cannot be loaded fail with job id 0.
pub fn run_batch(
    pool: &WorkerPool,
    comparator: &Arc<Comparator>,
    store: &dyn AudioStore,
    pairs: &[Pair],
    verbose: bool,
) -> Vec<BatchEntry> {
    let mut entries = Vec::with_capacity(pairs.len());
    let mut in_flight: VecDeque<InFlight> = VecDeque::new();

    for pair in pairs {
        let loaded = store
            .load_audio(&pair.reference)
            .and_then(|a| store.load_audio(&pair.candidate).map(|b| (a, b)));
        let (bytes_a, bytes_b) = match loaded {
            Ok(bytes) => bytes,
            Err(e) => {
                entries.push(BatchEntry::failed(0, &pair.reference, &pair.candidate, e));
                continue;
            }
        };

        let progress: Arc<dyn ProgressSink> = if verbose {
            Arc::new(LogSink::new(format!("{} vs {}", pair.reference, pair.candidate)))
        } else {
            Arc::new(NoopSink)
        };

        // Collect the oldest job before queueing past the pool's limit
        while in_flight.len() >= pool.max_pending() {
            if let Some(job) = in_flight.pop_front() {
                entries.push(job.finish());
            }
        }

        let comparator = Arc::clone(comparator);
        let titles = pair.titles.clone();
        let audio = Arc::new((bytes_a, bytes_b));
        let task = move |cancel: &CancellationToken, sink: &dyn ProgressSink| {
            comparator
                .compare_tracks(&audio.0, &audio.1, &titles, sink, cancel)
                .map(|result| result.overall_similarity)
        };

        let handle = loop {
            match pool.submit(Arc::clone(&progress), task.clone()) {
                Ok(handle) => break handle,
                Err(SubmitError::Saturated { .. }) => {
                    log::debug!("Pool saturated, collecting finished jobs");
                    match in_flight.pop_front() {
                        Some(job) => entries.push(job.finish()),
                        None => std::thread::sleep(SATURATED_BACKOFF),
                    }
                }
            }
        };
        in_flight.push_back(InFlight {
            reference: pair.reference.clone(),
            candidate: pair.candidate.clone(),
            handle,
        });
    }

    entries.extend(in_flight.into_iter().map(InFlight::finish));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use covermatch_core::service_config::WorkerConfig;
    use covermatch_core::{CompareConfig, LoadError};
    use std::collections::HashMap;
    use std::f32::consts::PI;
    use std::io::Cursor;

    struct MemoryStore {
        tracks: HashMap<String, Vec<u8>>,
    }

    impl AudioStore for MemoryStore {
        fn load_audio(&self, identifier: &str) -> Result<Vec<u8>, LoadError> {
            self.tracks
                .get(identifier)
                .cloned()
                .ok_or_else(|| LoadError::NotFound(identifier.to_string()))
        }

        fn list(&self) -> Result<Vec<String>, LoadError> {
            Ok(self.tracks.keys().cloned().collect())
        }
    }

    fn tone_wav(freq: f32, seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(seconds * 22050.0) as usize {
                let value = 0.8 * (2.0 * PI * freq * i as f32 / 22050.0).sin();
                writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn pair(reference: &str, candidate: &str) -> Pair {
        Pair {
            reference: reference.to_string(),
            candidate: candidate.to_string(),
            titles: Titles::default(),
        }
    }

    #[test]
    fn test_parse_pairs_skips_comments_and_malformed() {
        let pairs = parse_pairs("# header\nsongs/a.wav, songs/b.wav\n\nlonely\nx,y,Original,Cover\n");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].reference, "songs/a.wav");
        assert_eq!(pairs[0].candidate, "songs/b.wav");
        assert_eq!(pairs[0].titles, Titles::new("a", "b"));
        assert_eq!(pairs[1].titles, Titles::new("Original", "Cover"));
    }

    #[test]
    fn test_more_pairs_than_pending_slots() {
        let mut tracks = HashMap::new();
        tracks.insert("tone".to_string(), tone_wav(440.0, 1.0));
        tracks.insert("noise".to_string(), b"not audio".to_vec());
        let store = MemoryStore { tracks };

        let pool = WorkerPool::new(&WorkerConfig {
            threads: 1,
            max_pending: 1,
        })
        .unwrap();
        let comparator = Arc::new(Comparator::new(CompareConfig::default()).unwrap());
        let pairs = vec![
            pair("tone", "tone"),
            pair("tone", "noise"),
            pair("tone", "missing"),
            pair("noise", "tone"),
            pair("tone", "tone"),
        ];

        let entries = run_batch(&pool, &comparator, &store, &pairs, false);
        assert_eq!(entries.len(), pairs.len());
        assert_eq!(pool.pending(), 0);

        let completed: Vec<&BatchEntry> = entries.iter().filter(|e| e.status == "completed").collect();
        assert_eq!(completed.len(), 2);
        for entry in &completed {
            assert!(entry.percentage.unwrap_or(0.0) >= 95.0);
            assert!(entry.job_id > 0);
        }

        let missing = entries.iter().find(|e| e.candidate == "missing").unwrap();
        assert_eq!(missing.job_id, 0);
        assert!(missing.error.as_deref().unwrap_or("").contains("not found"));

        let mut ids: Vec<u64> = entries.iter().map(|e| e.job_id).filter(|&id| id > 0).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
