//! Error types for the ingestion pipeline
//!
//! Two tiers: validation and configuration problems are returned straight
//! from `send`, while dispatch failures are collected asynchronously and only
//! surface from `close` as an [`AggregateIngestionError`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::pipeline::PipelineState;
use crate::request::BatchKey;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Maximum number of individual failures spelled out in an aggregate message
const MAX_LISTED_FAILURES: usize = 5;

#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// The submitted request can never be processed
    #[error("invalid record: {0}")]
    Validation(String),

    /// A pre-processing step rejected the submitted records
    #[error("pre-processing step '{step}' rejected records: {reason}")]
    StepRejected { step: String, reason: String },

    /// No sender or step could be resolved, or a setting is invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Records were submitted after `close` was called
    #[error("pipeline is {0} and no longer accepts records")]
    Closed(PipelineState),

    /// One or more batches failed to dispatch
    #[error(transparent)]
    Aggregate(#[from] AggregateIngestionError),

    /// The aggregator or a worker task could not be joined
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error was raised synchronously for a single `send`
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::StepRejected { .. })
    }
}

/// Failure of a single batch dispatch
#[derive(Error, Debug, Clone)]
#[error("batch {batch_id} ({records} records) to {key} failed: {message}")]
pub struct DispatchError {
    pub batch_id: u64,
    pub key: BatchKey,
    pub records: usize,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Every dispatch failure observed before the pipeline finished draining
#[derive(Error, Debug, Clone)]
#[error("{} of {batches_dispatched} batches failed ({records_failed} records lost){}", .failures.len(), summarize(.failures))]
pub struct AggregateIngestionError {
    pub failures: Vec<DispatchError>,
    pub batches_dispatched: u64,
    pub records_failed: u64,
}

fn summarize(failures: &[DispatchError]) -> String {
    let mut out = String::new();
    for failure in failures.iter().take(MAX_LISTED_FAILURES) {
        out.push_str("; ");
        out.push_str(&failure.to_string());
    }
    if failures.len() > MAX_LISTED_FAILURES {
        out.push_str(&format!("; and {} more", failures.len() - MAX_LISTED_FAILURES));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn failure(batch_id: u64) -> DispatchError {
        DispatchError {
            batch_id,
            key: BatchKey::new("http", Some("https://sink.local"), "events", None),
            records: 3,
            message: "connection refused".to_string(),
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = IngestError::validation("destination table is empty");
        assert!(err.to_string().contains("destination table is empty"));
        assert!(err.is_rejection());

        let err = IngestError::config("no sender registered for 'pg'");
        assert!(err.to_string().starts_with("configuration error"));
        assert!(!err.is_rejection());

        let err = IngestError::Closed(PipelineState::Draining);
        assert!(err.to_string().contains("draining"));
    }

    #[test]
    fn test_dispatch_error_names_the_batch() {
        let msg = failure(42).to_string();
        assert!(msg.contains("batch 42"));
        assert!(msg.contains("3 records"));
        assert!(msg.contains("http"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_aggregate_lists_a_bounded_number_of_failures() {
        let err = AggregateIngestionError {
            failures: (0..8).map(failure).collect(),
            batches_dispatched: 10,
            records_failed: 24,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("8 of 10 batches failed (24 records lost)"));
        assert!(msg.contains("batch 4 "));
        assert!(!msg.contains("batch 5 "));
        assert!(msg.ends_with("and 3 more"));
    }
}
