//! Sluice Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Asynchronous batched ingestion: callers hand records to an
//! [`IngestionPipeline`], which pre-processes them, groups them into
//! size-bounded batches per destination and dispatches the batches to
//! pluggable senders from a pool of worker tasks.
//!
//! # Components
//!
//! - **Facade** ([`IngestionPipeline`]): `send` and `close`, state and metrics
//! - **Pre-processing** ([`preprocess`]): named steps applied before queueing
//! - **Aggregator**: one task turning the record queue into batches
//! - **Workers**: tasks draining the batch queue into [`Sender`]s
//! - **Tracker**: counters and the failure list reported by `close`
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::Record;
//! use sluice_ingest::{IngestConfig, IngestionPipeline, SendRequest, SenderRegistry, StepRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig {
//!         methods: vec!["log".into()],
//!         preprocess_steps: vec!["ingestion_timestamp".into()],
//!         ..IngestConfig::from_env()?
//!     };
//!     let pipeline = IngestionPipeline::start(
//!         config,
//!         SenderRegistry::with_builtins(),
//!         &StepRegistry::with_builtins(),
//!     )?;
//!
//!     for id in 0..100 {
//!         let record = Record::new().with("id", id);
//!         pipeline.send(SendRequest::new("events", record).collection_id("run-1")).await?;
//!     }
//!
//!     let summary = pipeline.close().await?;
//!     println!("dispatched {} records", summary.metrics.records_dispatched);
//!     Ok(())
//! }
//! ```

mod aggregator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod preprocess;
pub mod request;
pub mod sender;
pub mod tracker;
mod worker;

pub use config::IngestConfig;
pub use error::{AggregateIngestionError, DispatchError, IngestError, Result};
pub use pipeline::{IngestionPipeline, PipelineState};
pub use preprocess::{PreprocessStep, StepContext, StepRegistry};
pub use request::{BatchKey, SendRequest};
pub use sender::{DispatchCall, DispatchContext, FnSender, Sender, SenderRegistry};
pub use tracker::{IngestionSummary, MetricsHandle, MetricsSnapshot};
