//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities used across the Sluice workspace:
//!
//! - **Records**: the ordered field map submitted for ingestion, plus metadata
//! - **Errors**: record model error type
//! - **Logging**: one place to configure `tracing` for every binary
//!
//! # Example
//!
//! ```
//! use sluice_common::Record;
//!
//! let record = Record::new().with("id", 1).with("name", "alpha");
//! assert_eq!(record.len(), 2);
//! ```

pub mod error;
pub mod logging;
pub mod record;

pub use error::{Result, SluiceError};
pub use record::{Metadata, Record};
