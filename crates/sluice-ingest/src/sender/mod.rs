//! Destination senders
//!
//! A sender writes one batch to a concrete destination. The pipeline only
//! knows the [`Sender`] trait; implementations are registered by name in a
//! [`SenderRegistry`] and looked up by the batch's method.
//!
//! The pipeline never retries. Retry and backoff, if wanted, belong inside
//! the sender; an error returned from `dispatch` is final for that batch.

mod builtin;
mod registry;

use async_trait::async_trait;
use sluice_common::{Metadata, Record};

pub use builtin::{DispatchCall, FnSender, LogSender, NullSender};
pub use registry::SenderRegistry;

/// Routing and metadata of the batch being dispatched
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub destination_table: &'a str,
    pub target: Option<&'a str>,
    pub collection_id: Option<&'a str>,
    pub metadata: &'a Metadata,
}

/// Writes batches to one kind of destination
#[async_trait]
pub trait Sender: Send + Sync {
    /// Write `records` to the destination described by `ctx`
    ///
    /// Returns the (possibly updated) metadata on success. The call may
    /// take as long as it needs; only the worker running it waits.
    async fn dispatch(&self, records: &[Record], ctx: DispatchContext<'_>) -> anyhow::Result<Metadata>;
}
