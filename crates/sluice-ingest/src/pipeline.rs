//! Ingestion facade
//!
//! [`IngestionPipeline`] owns the queues and tasks of one pipeline. Callers
//! `send` records from any number of tasks and `close` once at the end.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::{Aggregator, QueuedRecord};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::preprocess::{PreprocessChain, StepContext, StepRegistry};
use crate::request::{BatchKey, SendRequest};
use crate::sender::SenderRegistry;
use crate::tracker::{CompletionTracker, IngestionSummary, MetricsHandle, MetricsSnapshot};
use crate::worker::DispatchWorker;

/// Lifecycle of a pipeline; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    /// Accepting records
    Open = 0,
    /// `close` was called; queued records are being dispatched
    Draining = 1,
    /// Every queued record has an outcome
    Closed = 2,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct PipelineTasks {
    aggregator: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Outcome of the drain task, awaitable by any number of `close` callers
type DrainOutcome = Shared<BoxFuture<'static, Result<IngestionSummary>>>;

/// Asynchronous batched ingestion pipeline
///
/// # Example
///
/// ```no_run
/// use sluice_common::Record;
/// use sluice_ingest::{IngestConfig, IngestionPipeline, SendRequest, SenderRegistry, StepRegistry};
///
/// # async fn run() -> sluice_ingest::Result<()> {
/// let config = IngestConfig {
///     default_method: Some("log".into()),
///     ..Default::default()
/// };
/// let pipeline = IngestionPipeline::start(
///     config,
///     SenderRegistry::with_builtins(),
///     &StepRegistry::with_builtins(),
/// )?;
///
/// pipeline
///     .send(SendRequest::new("events", Record::new().with("id", 1)))
///     .await?;
///
/// let summary = pipeline.close().await?;
/// assert_eq!(summary.metrics.records_dispatched, 1);
/// # Ok(())
/// # }
/// ```
pub struct IngestionPipeline {
    id: Uuid,
    config: IngestConfig,
    senders: Arc<SenderRegistry>,
    chain: PreprocessChain,
    fallback_method: Option<String>,
    state: Arc<AtomicU8>,
    object_tx: Mutex<Option<mpsc::Sender<QueuedRecord>>>,
    tasks: Mutex<Option<PipelineTasks>>,
    tracker: Arc<CompletionTracker>,
    drain: Mutex<Option<DrainOutcome>>,
    started_at: Instant,
}

impl IngestionPipeline {
    /// Validate the configuration and spawn the aggregator and workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: IngestConfig, senders: SenderRegistry, steps: &StepRegistry) -> Result<Self> {
        config.validate()?;
        let chain = PreprocessChain::resolve(steps, &config.preprocess_steps)?;
        let fallback_method = resolve_fallback_method(&config, &senders)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| IngestError::config(format!("pipeline must start inside a tokio runtime: {e}")))?;

        let id = Uuid::new_v4();
        let senders = Arc::new(senders);
        let tracker = Arc::new(CompletionTracker::new(config.log_upload_errors));

        let (object_tx, object_rx) = mpsc::channel(config.objects_queue_size);
        let (payload_tx, payload_rx) = mpsc::channel(config.payloads_queue_size);

        let aggregator = Aggregator::new(
            object_rx,
            payload_tx,
            config.payload_size_bytes_threshold,
            config.payload_aggregator_timeout(),
            tracker.clone(),
        );
        let aggregator = runtime.spawn(aggregator.run());

        let payload_rx = Arc::new(tokio::sync::Mutex::new(payload_rx));
        let workers = (0..config.worker_count)
            .map(|worker_id| {
                let worker =
                    DispatchWorker::new(worker_id, payload_rx.clone(), senders.clone(), tracker.clone());
                runtime.spawn(worker.run())
            })
            .collect();

        info!(
            pipeline_id = %id,
            workers = config.worker_count,
            threshold_bytes = config.payload_size_bytes_threshold,
            idle_timeout_secs = config.payload_aggregator_timeout_secs,
            steps = ?chain.names(),
            fallback_method = fallback_method.as_deref().unwrap_or("-"),
            "Ingestion pipeline started"
        );

        Ok(Self {
            id,
            config,
            senders,
            chain,
            fallback_method,
            state: Arc::new(AtomicU8::new(PipelineState::Open as u8)),
            object_tx: Mutex::new(Some(object_tx)),
            tasks: Mutex::new(Some(PipelineTasks { aggregator, workers })),
            tracker,
            drain: Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    /// Submit records for asynchronous delivery
    ///
    /// Validation, method resolution and pre-processing happen before
    /// anything is queued, so their errors are returned here. Waits only when
    /// the record queue is full. Dispatch failures are never returned from
    /// `send`; they surface from [`close`](Self::close).
    pub async fn send(&self, request: SendRequest) -> Result<()> {
        self.ensure_open()?;
        request.validate()?;
        let method = self.resolve_method(request.method.as_deref())?;

        let SendRequest {
            records,
            destination_table,
            target,
            collection_id,
            metadata,
            ..
        } = request;

        let ctx = StepContext {
            destination_table: &destination_table,
            target: target.as_deref(),
            collection_id: collection_id.as_deref(),
        };
        let (records, metadata) = self.chain.apply(records, &ctx, metadata)?;
        if records.is_empty() {
            return Ok(());
        }

        let sized = records
            .into_iter()
            .map(|record| record.serialized_len().map(|size| (record, size)))
            .collect::<sluice_common::Result<Vec<_>>>()
            .map_err(|e| IngestError::validation(e.to_string()))?;

        let tx = self.object_sender()?;
        let key = Arc::new(BatchKey::new(
            method,
            target.as_deref(),
            destination_table,
            collection_id.as_deref(),
        ));
        let metadata = Arc::new(metadata);

        for (record, size_bytes) in sized {
            tx.send(QueuedRecord {
                key: key.clone(),
                record,
                size_bytes,
                metadata: metadata.clone(),
            })
            .await
            .map_err(|_| IngestError::Task("record queue closed unexpectedly".to_string()))?;
            self.tracker.record_accepted(size_bytes);
        }

        Ok(())
    }

    /// Stop accepting records and wait until every queued record has an outcome
    ///
    /// Safe to call more than once and from several tasks: all callers wait
    /// for the same drain and receive the same outcome. The drain runs in its
    /// own task, so a caller that stops waiting does not abort it. Returns
    /// [`IngestError::Aggregate`] when any batch failed and
    /// `raise_exception_on_failure` is set.
    pub async fn close(&self) -> Result<IngestionSummary> {
        let drain = self
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| self.start_drain())
            .clone();
        drain.await
    }

    fn start_drain(&self) -> DrainOutcome {
        self.state.store(PipelineState::Draining as u8, Ordering::SeqCst);
        tracing::debug!(pipeline_id = %self.id, "Draining pipeline");

        // Senders cloned by in-flight `send` calls keep the queue open until
        // those calls finish.
        drop(self.object_tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let drain = Drain {
            pipeline_id: self.id,
            tasks: self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take(),
            state: self.state.clone(),
            tracker: self.tracker.clone(),
            raise_on_failure: self.config.raise_exception_on_failure,
            started_at: self.started_at,
        };
        let handle = tokio::spawn(drain.run());

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(IngestError::Task(format!("drain: {e}"))))
        }
        .boxed()
        .shared()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.tracker.snapshot()
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        MetricsHandle::new(self.tracker.clone())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            PipelineState::Open => Ok(()),
            state => Err(IngestError::Closed(state)),
        }
    }

    fn object_sender(&self) -> Result<mpsc::Sender<QueuedRecord>> {
        self.object_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IngestError::Closed(self.state()))
    }

    fn resolve_method(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(method) if self.senders.contains(method) => Ok(method.to_string()),
            Some(method) => Err(IngestError::config(format!(
                "no sender registered for method '{}' (registered: {})",
                method,
                self.senders.methods().join(", ")
            ))),
            None => self.fallback_method.clone().ok_or_else(|| {
                IngestError::config(
                    "no method given and neither `methods` nor `default_method` resolves to a registered sender",
                )
            }),
        }
    }
}

/// Everything the drain task needs, detached from the pipeline's lifetime
struct Drain {
    pipeline_id: Uuid,
    tasks: Option<PipelineTasks>,
    state: Arc<AtomicU8>,
    tracker: Arc<CompletionTracker>,
    raise_on_failure: bool,
    started_at: Instant,
}

impl Drain {
    async fn run(self) -> Result<IngestionSummary> {
        let mut task_error = None;
        if let Some(PipelineTasks { aggregator, workers }) = self.tasks {
            if let Err(e) = aggregator.await {
                task_error = Some(IngestError::Task(format!("aggregator: {e}")));
            }
            for (worker_id, worker) in workers.into_iter().enumerate() {
                if let Err(e) = worker.await {
                    task_error.get_or_insert(IngestError::Task(format!("worker {worker_id}: {e}")));
                }
            }
        }

        self.state.store(PipelineState::Closed as u8, Ordering::SeqCst);
        let summary = self.tracker.summary();
        let metrics = summary.metrics;

        info!(
            pipeline_id = %self.pipeline_id,
            records_accepted = metrics.records_accepted,
            records_dispatched = metrics.records_dispatched,
            records_failed = metrics.records_failed,
            batches = metrics.batches_created,
            batches_failed = metrics.batches_failed,
            bytes = metrics.bytes_accepted,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Ingestion pipeline closed"
        );

        if let Some(e) = task_error {
            return Err(e);
        }
        if !summary.is_success() && self.raise_on_failure {
            return Err(summary.into_error().into());
        }
        Ok(summary)
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        if self.state() == PipelineState::Open {
            warn!(
                pipeline_id = %self.id,
                in_flight = self.tracker.snapshot().records_in_flight(),
                "Ingestion pipeline dropped without close; queued records are dispatched in the background"
            );
        }
    }
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("chain", &self.chain)
            .field("fallback_method", &self.fallback_method)
            .finish_non_exhaustive()
    }
}

/// Method used by sends that name none: first registered entry of
/// `methods`, then `default_method`
fn resolve_fallback_method(config: &IngestConfig, senders: &SenderRegistry) -> Result<Option<String>> {
    if let Some(default) = &config.default_method {
        if !senders.contains(default) {
            return Err(IngestError::config(format!(
                "default_method '{}' has no registered sender (registered: {})",
                default,
                senders.methods().join(", ")
            )));
        }
    }

    let mut preferred = None;
    for method in &config.methods {
        if senders.contains(method) {
            preferred.get_or_insert_with(|| method.clone());
        } else {
            warn!(method = %method, "Configured method has no registered sender, skipping");
        }
    }

    Ok(preferred.or_else(|| config.default_method.clone()))
}
