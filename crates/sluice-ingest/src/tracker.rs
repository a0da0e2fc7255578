//! Completion tracking
//!
//! Counts every record and batch as it moves through the pipeline and keeps
//! the list of failed dispatches. Counters are lock-free; only the failure
//! list sits behind a mutex.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

use crate::error::{AggregateIngestionError, DispatchError};
use crate::request::BatchKey;

/// Shared counters and failure list for one pipeline
#[derive(Debug, Default)]
pub struct CompletionTracker {
    records_accepted: AtomicU64,
    records_dispatched: AtomicU64,
    records_failed: AtomicU64,
    batches_created: AtomicU64,
    batches_dispatched: AtomicU64,
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    bytes_accepted: AtomicU64,
    failures: Mutex<Vec<DispatchError>>,
    log_upload_errors: bool,
}

impl CompletionTracker {
    pub fn new(log_upload_errors: bool) -> Self {
        Self {
            log_upload_errors,
            ..Default::default()
        }
    }

    /// A record entered the object queue
    pub fn record_accepted(&self, bytes: usize) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_accepted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// The aggregator closed a batch
    pub fn batch_created(&self) {
        self.batches_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A sender accepted a batch
    pub fn batch_succeeded(&self, records: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.records_dispatched.fetch_add(records as u64, Ordering::Relaxed);
    }

    /// A batch could not be delivered; the outcome is final
    pub fn batch_failed(&self, batch_id: u64, key: &BatchKey, records: usize, message: impl Into<String>) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records as u64, Ordering::Relaxed);

        let failure = DispatchError {
            batch_id,
            key: key.clone(),
            records,
            message: message.into(),
            failed_at: Utc::now(),
        };

        if self.log_upload_errors {
            error!(
                batch_id,
                key = %failure.key,
                records,
                error = %failure.message,
                "Batch dispatch failed"
            );
        }

        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_created: self.batches_created.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            bytes_accepted: self.bytes_accepted.load(Ordering::Relaxed),
        }
    }

    pub fn failures(&self) -> Vec<DispatchError> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Final report, taken once the pipeline has drained
    pub fn summary(&self) -> IngestionSummary {
        IngestionSummary {
            metrics: self.snapshot(),
            failures: self.failures(),
        }
    }
}

/// Counter values at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_accepted: u64,
    /// Records in batches a sender accepted
    pub records_dispatched: u64,
    pub records_failed: u64,
    pub batches_created: u64,
    /// Batches with a final outcome, successful or not
    pub batches_dispatched: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub bytes_accepted: u64,
}

impl MetricsSnapshot {
    /// Records accepted but without an outcome yet
    pub fn records_in_flight(&self) -> u64 {
        self.records_accepted
            .saturating_sub(self.records_dispatched + self.records_failed)
    }
}

/// Outcome of a completed drain
#[derive(Debug, Clone)]
pub struct IngestionSummary {
    pub metrics: MetricsSnapshot,
    pub failures: Vec<DispatchError>,
}

impl IngestionSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_error(self) -> AggregateIngestionError {
        AggregateIngestionError {
            batches_dispatched: self.metrics.batches_dispatched,
            records_failed: self.metrics.records_failed,
            failures: self.failures,
        }
    }
}

/// Cloneable read-only view of a pipeline's counters
///
/// Stays valid after the pipeline itself is dropped.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    tracker: Arc<CompletionTracker>,
}

impl MetricsHandle {
    pub(crate) fn new(tracker: Arc<CompletionTracker>) -> Self {
        Self { tracker }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.tracker.snapshot()
    }

    pub fn failures(&self) -> Vec<DispatchError> {
        self.tracker.failures()
    }
}
