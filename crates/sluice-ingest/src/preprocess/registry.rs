//! Named pre-processing steps

use std::collections::HashMap;
use std::sync::Arc;

use super::{DropNulls, IngestionTimestamp, PreprocessStep};
use crate::error::{IngestError, Result};

/// Maps step names used in configuration to step implementations
///
/// # Example
///
/// ```ignore
/// let mut steps = StepRegistry::with_builtins();
/// steps.register("redact_email", RedactEmail)?;
///
/// let config = IngestConfig {
///     preprocess_steps: vec!["redact_email".into(), "ingestion_timestamp".into()],
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn PreprocessStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `drop_nulls` and `ingestion_timestamp`
    pub fn with_builtins() -> Self {
        let mut steps: HashMap<String, Arc<dyn PreprocessStep>> = HashMap::new();
        steps.insert("drop_nulls".to_string(), Arc::new(DropNulls));
        steps.insert("ingestion_timestamp".to_string(), Arc::new(IngestionTimestamp));
        Self { steps }
    }

    /// Register a step under `name`
    ///
    /// Fails with a configuration error if the name is taken.
    pub fn register<S: PreprocessStep + 'static>(&mut self, name: &str, step: S) -> Result<()> {
        self.register_arc(name, Arc::new(step))
    }

    pub fn register_arc(&mut self, name: &str, step: Arc<dyn PreprocessStep>) -> Result<()> {
        if self.steps.contains_key(name) {
            return Err(IngestError::config(format!(
                "pre-processing step '{}' is already registered",
                name
            )));
        }
        self.steps.insert(name.to_string(), step);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PreprocessStep>> {
        self.steps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = StepRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["drop_nulls", "ingestion_timestamp"]);
        assert!(registry.get("drop_nulls").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StepRegistry::new();
        registry.register("strip", DropNulls).unwrap();
        let err = registry.register("strip", DropNulls).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert!(registry.contains("strip"));
    }
}
