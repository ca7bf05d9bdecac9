//! Progress reporting for long-running comparisons
//!
//! The comparator publishes updates to whatever [`ProgressSink`] it was given.
//! Delivery is best-effort: a sink must never fail or block a comparison.

use crate::job::JobStatus;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// One progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: JobStatus,
    /// 0..=100
    pub percent: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(status: JobStatus, percent: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Receiver of progress updates
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: ProgressUpdate);
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn publish(&self, _update: ProgressUpdate) {}
}

/// Forwards updates to the `log` facade at info level
#[derive(Debug, Clone)]
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl ProgressSink for LogSink {
    fn publish(&self, update: ProgressUpdate) {
        log::info!("[{}] {:>3}% {}", self.label, update.percent, update.message);
    }
}

/// Sends updates down a channel; a dropped receiver is ignored
pub struct ChannelSink {
    sender: Mutex<Sender<ProgressUpdate>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<ProgressUpdate>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, update: ProgressUpdate) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(update);
        }
    }
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn publish(&self, update: ProgressUpdate) {
        self(update)
    }
}
