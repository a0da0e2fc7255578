//! Record pre-processing
//!
//! Steps run synchronously on the caller's task, in configured order, before
//! records are queued. A failing step rejects only the `send` that triggered
//! it, so malformed input is reported to the caller immediately.

mod builtin;
mod chain;
mod registry;

use sluice_common::{Metadata, Record};

pub use builtin::{DropNulls, IngestionTimestamp, INGESTED_AT_FIELD};
pub use chain::PreprocessChain;
pub use registry::StepRegistry;

/// Routing of the records a step is looking at
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub destination_table: &'a str,
    pub target: Option<&'a str>,
    pub collection_id: Option<&'a str>,
}

/// A pure transformation over the records of one `send`
///
/// Steps may rewrite, expand or filter records and may update the metadata.
/// Returning an error rejects the whole `send`.
pub trait PreprocessStep: Send + Sync {
    /// Name used in error messages and logs
    fn name(&self) -> &str;

    fn apply(
        &self,
        records: Vec<Record>,
        ctx: &StepContext<'_>,
        metadata: Metadata,
    ) -> anyhow::Result<(Vec<Record>, Metadata)>;
}
