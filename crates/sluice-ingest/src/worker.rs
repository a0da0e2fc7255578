//! Dispatch workers
//!
//! Workers share the payload queue receiver and hand each batch to the sender
//! registered for its method. Every batch gets exactly one attempt; errors and
//! panics raised by the sender are recorded as failures and the worker moves
//! on to the next batch.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::aggregator::Batch;
use crate::sender::SenderRegistry;
use crate::tracker::CompletionTracker;

pub(crate) type SharedBatchReceiver = Arc<Mutex<mpsc::Receiver<Batch>>>;

pub(crate) struct DispatchWorker {
    worker_id: usize,
    rx: SharedBatchReceiver,
    senders: Arc<SenderRegistry>,
    tracker: Arc<CompletionTracker>,
}

impl DispatchWorker {
    pub fn new(
        worker_id: usize,
        rx: SharedBatchReceiver,
        senders: Arc<SenderRegistry>,
        tracker: Arc<CompletionTracker>,
    ) -> Self {
        Self {
            worker_id,
            rx,
            senders,
            tracker,
        }
    }

    /// Process batches until the payload queue is closed and empty
    pub async fn run(self) {
        let mut processed = 0u64;
        loop {
            let batch = self.rx.lock().await.recv().await;
            let Some(batch) = batch else {
                break;
            };
            self.dispatch(batch).await;
            processed += 1;
        }
        tracing::debug!(worker_id = self.worker_id, processed, "Worker finished");
    }

    async fn dispatch(&self, batch: Batch) {
        let records = batch.records.len();

        let Some(sender) = self.senders.get(&batch.key.method) else {
            self.tracker.batch_failed(
                batch.id,
                &batch.key,
                records,
                format!("no sender registered for method '{}'", batch.key.method),
            );
            return;
        };

        let outcome = AssertUnwindSafe(sender.dispatch(&batch.records, batch.context()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(_metadata)) => {
                self.tracker.batch_succeeded(records);
                tracing::debug!(
                    worker_id = self.worker_id,
                    batch_id = batch.id,
                    key = %batch.key,
                    records,
                    "Batch dispatched"
                );
            }
            Ok(Err(e)) => {
                self.tracker
                    .batch_failed(batch.id, &batch.key, records, format!("{:#}", e));
            }
            Err(panic) => {
                self.tracker.batch_failed(
                    batch.id,
                    &batch.key,
                    records,
                    format!("sender panicked: {}", panic_message(panic.as_ref())),
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregator::{Aggregator, QueuedRecord};
    use crate::request::BatchKey;
    use crate::sender::{DispatchCall, FnSender};
    use sluice_common::{Metadata, Record};
    use tokio::time::Duration;

    async fn run_one(method: &str, senders: SenderRegistry) -> Arc<CompletionTracker> {
        let (obj_tx, obj_rx) = mpsc::channel(4);
        let (pay_tx, pay_rx) = mpsc::channel(4);
        let tracker = Arc::new(CompletionTracker::new(false));

        let aggregator = Aggregator::new(obj_rx, pay_tx, 1, Duration::from_secs(60), tracker.clone());
        let worker = DispatchWorker::new(
            0,
            Arc::new(Mutex::new(pay_rx)),
            Arc::new(senders),
            tracker.clone(),
        );
        let aggregator = tokio::spawn(aggregator.run());
        let worker = tokio::spawn(worker.run());

        obj_tx
            .send(QueuedRecord {
                key: Arc::new(BatchKey::new(method, None, "events", None)),
                record: Record::new().with("id", 1),
                size_bytes: 8,
                metadata: Arc::new(Metadata::new()),
            })
            .await
            .unwrap();
        drop(obj_tx);

        aggregator.await.unwrap();
        worker.await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_success_is_counted() {
        let tracker = run_one("null", SenderRegistry::with_builtins()).await;
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.batches_succeeded, 1);
        assert_eq!(snapshot.records_dispatched, 1);
    }

    #[tokio::test]
    async fn test_sender_error_is_recorded() {
        let mut senders = SenderRegistry::new();
        senders
            .register(
                "broken",
                FnSender::new(|_call: DispatchCall| async {
                    Err::<Metadata, _>(anyhow::anyhow!("disk full"))
                }),
            )
            .unwrap();

        let tracker = run_one("broken", senders).await;
        let failures = tracker.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_sender_panic_is_recorded() {
        let mut senders = SenderRegistry::new();
        senders
            .register(
                "panics",
                FnSender::new(|call: DispatchCall| async move {
                    assert!(call.records.is_empty(), "sender exploded");
                    Ok::<_, anyhow::Error>(call.metadata)
                }),
            )
            .unwrap();

        let tracker = run_one("panics", senders).await;
        let failures = tracker.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("sender exploded"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_recorded() {
        let tracker = run_one("missing", SenderRegistry::new()).await;
        assert!(tracker.failures()[0].message.contains("no sender registered"));
    }
}
