//! Background comparison jobs
//!
//! A [`WorkerPool`] runs jobs on a dedicated rayon pool and refuses new work
//! once `max_pending` jobs are queued or running. Each job moves through
//! `Pending -> Processing -> Completed | Failed`; terminal states are final.

use crate::comparison::{Comparator, ComparisonResult, Titles};
use crate::error::ComparisonError;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::service_config::WorkerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed(_))
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed(_))
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

/// Status plus bookkeeping timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(&next) {
            return Err(TransitionError {
                from: self.status.name(),
                to: next.name(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Cooperative cancellation flag shared between a job and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<(), ComparisonError> {
        if self.is_cancelled() {
            Err(ComparisonError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("worker pool is saturated ({max_pending} jobs pending)")]
    Saturated { max_pending: usize },
}

#[derive(Debug, Error)]
#[error("failed to start worker pool: {0}")]
pub struct PoolBuildError(#[from] rayon::ThreadPoolBuildError);

struct JobShared<T> {
    record: Mutex<JobRecord>,
    outcome: Mutex<Option<Result<T, ComparisonError>>>,
    finished: Condvar,
    cancel: CancellationToken,
}

impl<T> JobShared<T> {
    fn set_status(&self, next: JobStatus) {
        if let Ok(mut record) = self.record.lock() {
            if let Err(e) = record.transition(next) {
                log::warn!("Job {}: {}", record.id, e);
            }
        }
    }
}

/// Owner's view of a submitted job
pub struct JobHandle<T> {
    id: u64,
    shared: Arc<JobShared<T>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        match self.shared.record.lock() {
            Ok(record) => record.status.clone(),
            Err(poisoned) => poisoned.into_inner().status.clone(),
        }
    }

    pub fn record(&self) -> JobRecord {
        match self.shared.record.lock() {
            Ok(record) => record.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Request cancellation; the job stops at its next checkpoint
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Block until the job finishes
    pub fn wait(self) -> Result<T, ComparisonError> {
        let mut outcome = match self.shared.outcome.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            outcome = match self.shared.finished.wait(outcome) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

/// Bounded pool of comparison workers
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    max_pending: usize,
    pending: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &WorkerConfig) -> Result<Self, PoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("covermatch-worker-{}", i))
            .build()?;
        Ok(Self {
            pool,
            max_pending: config.max_pending.max(1),
            pending: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Jobs queued or running right now
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Queue a job, or reject it when the pool is saturated
    pub fn submit<T, F>(
        &self,
        progress: Arc<dyn ProgressSink>,
        task: F,
    ) -> Result<JobHandle<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken, &dyn ProgressSink) -> Result<T, ComparisonError> + Send + 'static,
    {
        let max_pending = self.max_pending;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_pending).then(|| n + 1)
            })
            .map_err(|_| SubmitError::Saturated { max_pending })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(JobShared {
            record: Mutex::new(JobRecord::new(id)),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
            cancel: CancellationToken::new(),
        });
        progress.publish(ProgressUpdate::new(JobStatus::Pending, 0, "Queued"));
        log::debug!("Job {} queued ({} pending)", id, self.pending());

        let worker_shared = Arc::clone(&shared);
        let pending = Arc::clone(&self.pending);
        self.pool.spawn(move || {
            let shared = worker_shared;
            shared.set_status(JobStatus::Processing);

            let mut result = catch_unwind(AssertUnwindSafe(|| task(&shared.cancel, progress.as_ref())))
                .unwrap_or(Err(ComparisonError::WorkerPanicked));
            // A cancel that lands after the last checkpoint still wins
            if result.is_ok() && shared.cancel.is_cancelled() {
                result = Err(ComparisonError::Cancelled);
            }

            match &result {
                Ok(_) => {
                    shared.set_status(JobStatus::Completed);
                    log::info!("Job {} completed", id);
                }
                Err(e) => {
                    shared.set_status(JobStatus::Failed(e.to_string()));
                    progress.publish(ProgressUpdate::new(JobStatus::Failed(e.to_string()), 100, e.to_string()));
                    log::warn!("Job {} failed: {}", id, e);
                }
            }

            pending.fetch_sub(1, Ordering::SeqCst);
            let mut outcome = match shared.outcome.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *outcome = Some(result);
            shared.finished.notify_all();
        });

        Ok(JobHandle { id, shared })
    }

    /// Queue a comparison of two encoded tracks
    pub fn submit_comparison(
        &self,
        comparator: Arc<Comparator>,
        reference: Vec<u8>,
        candidate: Vec<u8>,
        titles: Titles,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<JobHandle<ComparisonResult>, SubmitError> {
        self.submit(progress, move |cancel, sink| {
            comparator.compare_tracks(&reference, &candidate, &titles, sink, cancel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pool(threads: usize, max_pending: usize) -> WorkerPool {
        WorkerPool::new(&WorkerConfig { threads, max_pending }).unwrap()
    }

    #[test]
    fn test_legal_transitions() {
        let mut record = JobRecord::new(1);
        assert_eq!(record.status, JobStatus::Pending);
        record.transition(JobStatus::Processing).unwrap();
        record.transition(JobStatus::Completed).unwrap();
        assert!(record.status.is_terminal());
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut record = JobRecord::new(1);
        record.transition(JobStatus::Processing).unwrap();
        record.transition(JobStatus::Failed("boom".into())).unwrap();
        let err = record.transition(JobStatus::Completed).unwrap_err();
        assert_eq!(err, TransitionError { from: "failed", to: "completed" });
        assert!(record.transition(JobStatus::Processing).is_err());
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut record = JobRecord::new(1);
        assert!(record.transition(JobStatus::Completed).is_err());
        assert_eq!(record.status, JobStatus::Pending);
    }

    #[test]
    fn test_job_completes() {
        let pool = pool(1, 2);
        let handle = pool.submit(Arc::new(NoopSink), |_, _| Ok(42)).unwrap();
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_failed_job_records_message() {
        let pool = pool(1, 2);
        let handle = pool
            .submit::<(), _>(Arc::new(NoopSink), |_, _| Err(ComparisonError::InvalidConfig("bad".into())))
            .unwrap();
        let shared = Arc::clone(&handle.shared);
        assert!(handle.wait().is_err());
        let status = shared.record.lock().unwrap().status.clone();
        assert_eq!(status, JobStatus::Failed("invalid configuration: bad".into()));
    }

    #[test]
    fn test_saturation_rejects_and_recovers() {
        let pool = pool(1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let blocker = pool
            .submit(Arc::new(NoopSink), move |_, _| {
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
                Ok(())
            })
            .unwrap();

        let rejected = pool.submit(Arc::new(NoopSink), |_, _| Ok(()));
        assert!(matches!(rejected, Err(SubmitError::Saturated { max_pending: 1 })));

        release_tx.send(()).unwrap();
        blocker.wait().unwrap();
        assert_eq!(pool.pending(), 0);
        assert!(pool.submit(Arc::new(NoopSink), |_, _| Ok(())).is_ok());
    }

    #[test]
    fn test_cancelled_job_fails() {
        let pool = pool(1, 2);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let handle = pool
            .submit::<(), _>(Arc::new(NoopSink), move |cancel, _| {
                let _ = started_tx.send(());
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                cancel.check()
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        handle.cancel();
        assert!(matches!(handle.wait(), Err(ComparisonError::Cancelled)));
    }

    #[test]
    fn test_cancel_after_last_checkpoint_discards_result() {
        let pool = pool(1, 2);
        let (cancel_tx, cancel_rx) = mpsc::channel::<CancellationToken>();
        let handle = pool
            .submit(Arc::new(NoopSink), move |cancel, _| {
                cancel.check()?;
                // Owner cancels once the task is past its only checkpoint
                let _ = cancel_tx.send(cancel.clone());
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(7)
            })
            .unwrap();
        let token = cancel_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        handle.cancel();
        assert!(token.is_cancelled());

        let shared = Arc::clone(&handle.shared);
        assert!(matches!(handle.wait(), Err(ComparisonError::Cancelled)));
        let status = shared.record.lock().unwrap().status.clone();
        assert_eq!(status, JobStatus::Failed(ComparisonError::Cancelled.to_string()));
    }

    #[test]
    fn test_status_moves_through_lifecycle() {
        let pool = pool(1, 3);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let running = pool
            .submit(Arc::new(NoopSink), move |_, _| {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
                Ok(1)
            })
            .unwrap();
        // Single worker is busy, so these stay queued
        let ok = pool.submit(Arc::new(NoopSink), |_, _| Ok(2)).unwrap();
        let failing = pool
            .submit::<i32, _>(Arc::new(NoopSink), |_, _| Err(ComparisonError::InvalidConfig("bad".into())))
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(running.status(), JobStatus::Processing);
        assert_eq!(ok.status(), JobStatus::Pending);
        assert_eq!(failing.status(), JobStatus::Pending);

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !(running.status().is_terminal() && ok.status().is_terminal() && failing.status().is_terminal()) {
            assert!(std::time::Instant::now() < deadline, "jobs never finished");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(running.status(), JobStatus::Completed);
        assert_eq!(ok.status(), JobStatus::Completed);
        assert_eq!(
            failing.status(),
            JobStatus::Failed("invalid configuration: bad".into())
        );
        let record = failing.record();
        assert!(record.updated_at >= record.created_at);

        assert_eq!(running.wait().unwrap(), 1);
        assert_eq!(ok.wait().unwrap(), 2);
        assert!(failing.wait().is_err());
    }

    #[test]
    fn test_panicking_job_fails() {
        let pool = pool(1, 2);
        let handle = pool
            .submit::<(), _>(Arc::new(NoopSink), |_, _| panic!("worker blew up"))
            .unwrap();
        assert!(matches!(handle.wait(), Err(ComparisonError::WorkerPanicked)));
    }
}
