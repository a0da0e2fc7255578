//! Send requests and batch routing keys

use serde::{Deserialize, Serialize};
use sluice_common::{Metadata, Record};
use std::fmt;

use crate::error::{IngestError, Result};

/// Input of one `send` call
///
/// # Example
///
/// ```
/// use sluice_common::Record;
/// use sluice_ingest::SendRequest;
///
/// let request = SendRequest::new("events", Record::new().with("id", 1))
///     .target("postgres://warehouse/analytics")
///     .collection_id("upload-7")
///     .method("postgres");
/// assert_eq!(request.records().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub(crate) records: Vec<Record>,
    pub(crate) destination_table: String,
    pub(crate) target: Option<String>,
    pub(crate) collection_id: Option<String>,
    pub(crate) method: Option<String>,
    pub(crate) metadata: Metadata,
}

impl SendRequest {
    /// A request carrying a single record
    pub fn new(destination_table: impl Into<String>, record: Record) -> Self {
        Self::many(destination_table, vec![record])
    }

    /// A request carrying several records that share routing
    pub fn many(destination_table: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            records,
            destination_table: destination_table.into(),
            target: None,
            collection_id: None,
            method: None,
            metadata: Metadata::new(),
        }
    }

    /// Connection string, URL or path understood by the sender
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn collection_id(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    /// Sender method; overrides the configured method list and default
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn destination_table(&self) -> &str {
        &self.destination_table
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.records.is_empty() {
            return Err(IngestError::validation("request carries no records"));
        }
        if self.destination_table.trim().is_empty() {
            return Err(IngestError::validation("destination table is required"));
        }
        if let Some(method) = &self.method {
            if method.trim().is_empty() {
                return Err(IngestError::validation("method cannot be blank"));
            }
        }
        Ok(())
    }
}

/// Where a batch is going
///
/// Records only share a batch when all four components match, so each batch
/// maps onto exactly one sender invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub method: String,
    pub target: Option<String>,
    pub destination_table: String,
    pub collection_id: Option<String>,
}

impl BatchKey {
    pub fn new(
        method: impl Into<String>,
        target: Option<&str>,
        destination_table: impl Into<String>,
        collection_id: Option<&str>,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.map(str::to_string),
            destination_table: destination_table.into(),
            collection_id: collection_id.map(str::to_string),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.destination_table)?;
        if let Some(target) = &self.target {
            write!(f, "@{}", target)?;
        }
        if let Some(collection_id) = &self.collection_id {
            write!(f, "#{}", collection_id)?;
        }
        Ok(())
    }
}
