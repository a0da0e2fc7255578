//! Senders that ship with the pipeline

use async_trait::async_trait;
use sluice_common::{Metadata, Record};
use std::future::Future;
use tracing::info;

use super::{DispatchContext, Sender};

/// Discards every batch and reports success
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSender;

#[async_trait]
impl Sender for NullSender {
    async fn dispatch(&self, _records: &[Record], ctx: DispatchContext<'_>) -> anyhow::Result<Metadata> {
        Ok(ctx.metadata.clone())
    }
}

/// Writes one structured log line per batch
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn dispatch(&self, records: &[Record], ctx: DispatchContext<'_>) -> anyhow::Result<Metadata> {
        let first = records
            .first()
            .map(serde_json::to_string)
            .transpose()?
            .unwrap_or_default();

        info!(
            table = %ctx.destination_table,
            destination = ctx.target.unwrap_or("-"),
            collection_id = ctx.collection_id.unwrap_or("-"),
            records = records.len(),
            first = %first,
            "Batch received"
        );
        Ok(ctx.metadata.clone())
    }
}

/// Owned copy of one dispatch, handed to the closure of a [`FnSender`]
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub records: Vec<Record>,
    pub destination_table: String,
    pub target: Option<String>,
    pub collection_id: Option<String>,
    pub metadata: Metadata,
}

/// Sender backed by an async closure
///
/// # Example
///
/// ```
/// use sluice_ingest::{FnSender, SenderRegistry};
///
/// let mut senders = SenderRegistry::new();
/// senders
///     .register("stdout", FnSender::new(|call| async move {
///         for record in &call.records {
///             println!("{}", serde_json::to_string(record)?);
///         }
///         Ok::<_, anyhow::Error>(call.metadata)
///     }))
///     .unwrap();
/// ```
pub struct FnSender<F> {
    f: F,
}

impl<F, Fut> FnSender<F>
where
    F: Fn(DispatchCall) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Metadata>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Sender for FnSender<F>
where
    F: Fn(DispatchCall) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Metadata>> + Send,
{
    async fn dispatch(&self, records: &[Record], ctx: DispatchContext<'_>) -> anyhow::Result<Metadata> {
        let call = DispatchCall {
            records: records.to_vec(),
            destination_table: ctx.destination_table.to_string(),
            target: ctx.target.map(str::to_string),
            collection_id: ctx.collection_id.map(str::to_string),
            metadata: ctx.metadata.clone(),
        };
        (self.f)(call).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx(metadata: &Metadata) -> DispatchContext<'_> {
        DispatchContext {
            destination_table: "events",
            target: Some("mem://"),
            collection_id: None,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_null_and_log_return_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!("unit"));
        let records = vec![Record::new().with("id", 1)];

        let out = NullSender.dispatch(&records, ctx(&metadata)).await.unwrap();
        assert_eq!(out, metadata);

        let out = LogSender.dispatch(&[], ctx(&metadata)).await.unwrap();
        assert_eq!(out.get("source"), Some(&json!("unit")));
    }

    #[tokio::test]
    async fn test_fn_sender_sees_owned_call() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sender = FnSender::new(move |call: DispatchCall| {
            let counter = counter.clone();
            async move {
                assert_eq!(call.destination_table, "events");
                assert_eq!(call.target.as_deref(), Some("mem://"));
                counter.fetch_add(call.records.len(), Ordering::SeqCst);
                if call.records.is_empty() {
                    return Err(anyhow::anyhow!("empty batch"));
                }
                Ok::<_, anyhow::Error>(call.metadata)
            }
        });

        let metadata = Metadata::new();
        let records = vec![Record::new(), Record::new()];
        sender.dispatch(&records, ctx(&metadata)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let err = sender.dispatch(&[], ctx(&metadata)).await.unwrap_err();
        assert!(err.to_string().contains("empty batch"));
    }
}
