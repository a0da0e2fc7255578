//! Batch aggregation
//!
//! A single aggregator task drains the object queue, grouping records by
//! [`BatchKey`] into open batches. A batch is sealed and pushed to the payload
//! queue once its serialized size exceeds the threshold, when no record has
//! arrived for the idle timeout, or when the object queue closes.

use sluice_common::{Metadata, Record};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};

use crate::request::BatchKey;
use crate::sender::DispatchContext;
use crate::tracker::CompletionTracker;

/// One record on its way from `send` to the aggregator
#[derive(Debug)]
pub(crate) struct QueuedRecord {
    pub key: Arc<BatchKey>,
    pub record: Record,
    pub size_bytes: usize,
    pub metadata: Arc<Metadata>,
}

/// Records sharing one key, dispatched with a single sender call
#[derive(Debug)]
pub(crate) struct Batch {
    pub id: u64,
    pub key: Arc<BatchKey>,
    pub records: Vec<Record>,
    pub size_bytes: usize,
    pub metadata: Metadata,
    pub created_at: Instant,
    last_metadata: Option<Arc<Metadata>>,
}

impl Batch {
    fn new(id: u64, key: Arc<BatchKey>) -> Self {
        Self {
            id,
            key,
            records: Vec::new(),
            size_bytes: 0,
            metadata: Metadata::new(),
            created_at: Instant::now(),
            last_metadata: None,
        }
    }

    fn push(&mut self, item: QueuedRecord) {
        self.merge_metadata(item.metadata);
        self.size_bytes += item.size_bytes;
        self.records.push(item.record);
    }

    // Records of one send share an Arc; merge it once. Later keys win.
    fn merge_metadata(&mut self, metadata: Arc<Metadata>) {
        if self
            .last_metadata
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &metadata))
        {
            return;
        }
        for (k, v) in metadata.iter() {
            self.metadata.insert(k.clone(), v.clone());
        }
        self.last_metadata = Some(metadata);
    }

    pub fn context(&self) -> DispatchContext<'_> {
        DispatchContext {
            destination_table: &self.key.destination_table,
            target: self.key.target.as_deref(),
            collection_id: self.key.collection_id.as_deref(),
            metadata: &self.metadata,
        }
    }
}

pub(crate) struct Aggregator {
    rx: mpsc::Receiver<QueuedRecord>,
    tx: mpsc::Sender<Batch>,
    open: HashMap<Arc<BatchKey>, Batch>,
    threshold: usize,
    idle_timeout: Duration,
    next_id: u64,
    tracker: Arc<CompletionTracker>,
}

impl Aggregator {
    pub fn new(
        rx: mpsc::Receiver<QueuedRecord>,
        tx: mpsc::Sender<Batch>,
        threshold: usize,
        idle_timeout: Duration,
        tracker: Arc<CompletionTracker>,
    ) -> Self {
        Self {
            rx,
            tx,
            open: HashMap::new(),
            threshold,
            idle_timeout,
            next_id: 0,
            tracker,
        }
    }

    /// Run until the object queue is closed and empty
    ///
    /// The payload queue sender is dropped on return, which lets the workers
    /// finish once they have drained it.
    pub async fn run(mut self) {
        loop {
            match timeout(self.idle_timeout, self.rx.recv()).await {
                Ok(Some(item)) => self.push(item).await,
                Ok(None) => break,
                Err(_) => self.flush_all("idle").await,
            }
        }

        self.flush_all("drain").await;
        tracing::debug!(batches = self.next_id, "Aggregator finished");
    }

    async fn push(&mut self, item: QueuedRecord) {
        let key = item.key.clone();
        let next_id = &mut self.next_id;
        let batch = self.open.entry(key.clone()).or_insert_with(|| {
            *next_id += 1;
            Batch::new(*next_id, key.clone())
        });
        batch.push(item);

        if batch.size_bytes > self.threshold {
            if let Some(batch) = self.open.remove(&key) {
                self.seal(batch, "size").await;
            }
        }
    }

    async fn flush_all(&mut self, reason: &'static str) {
        if self.open.is_empty() {
            return;
        }
        let mut batches: Vec<Batch> = self.open.drain().map(|(_, batch)| batch).collect();
        batches.sort_unstable_by_key(|batch| batch.id);
        for batch in batches {
            self.seal(batch, reason).await;
        }
    }

    async fn seal(&mut self, batch: Batch, reason: &'static str) {
        self.tracker.batch_created();
        tracing::debug!(
            batch_id = batch.id,
            key = %batch.key,
            records = batch.records.len(),
            size_bytes = batch.size_bytes,
            age_ms = batch.created_at.elapsed().as_millis() as u64,
            reason,
            "Flushing batch"
        );

        if let Err(mpsc::error::SendError(batch)) = self.tx.send(batch).await {
            self.tracker.batch_failed(
                batch.id,
                &batch.key,
                batch.records.len(),
                "payload queue closed before the batch could be queued",
            );
        }
    }
}
