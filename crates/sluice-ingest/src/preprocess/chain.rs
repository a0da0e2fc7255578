//! Ordered step chain

use sluice_common::{Metadata, Record};
use std::sync::Arc;

use super::{PreprocessStep, StepContext, StepRegistry};
use crate::error::{IngestError, Result};

/// Steps applied in sequence, each receiving the output of the previous one
///
/// The first failing step stops the chain and the records are dropped.
#[derive(Clone, Default)]
pub struct PreprocessChain {
    steps: Vec<Arc<dyn PreprocessStep>>,
}

impl PreprocessChain {
    pub fn new(steps: Vec<Arc<dyn PreprocessStep>>) -> Self {
        Self { steps }
    }

    /// Look up each name in the registry, failing on the first unknown one
    pub fn resolve<S: AsRef<str>>(registry: &StepRegistry, names: &[S]) -> Result<Self> {
        let steps = names
            .iter()
            .map(|name| {
                registry.get(name.as_ref()).ok_or_else(|| {
                    IngestError::config(format!(
                        "unknown pre-processing step '{}' (registered: {})",
                        name.as_ref(),
                        registry.names().join(", ")
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn apply(
        &self,
        records: Vec<Record>,
        ctx: &StepContext<'_>,
        metadata: Metadata,
    ) -> Result<(Vec<Record>, Metadata)> {
        let mut current = (records, metadata);

        for step in &self.steps {
            let (records, metadata) = current;
            current = step
                .apply(records, ctx, metadata)
                .map_err(|e| IngestError::StepRejected {
                    step: step.name().to_string(),
                    reason: format!("{:#}", e),
                })?;
        }

        Ok(current)
    }
}

impl std::fmt::Debug for PreprocessChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessChain")
            .field("steps", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Duplicate;

    impl PreprocessStep for Duplicate {
        fn name(&self) -> &str {
            "duplicate"
        }

        fn apply(
            &self,
            records: Vec<Record>,
            _ctx: &StepContext<'_>,
            mut metadata: Metadata,
        ) -> anyhow::Result<(Vec<Record>, Metadata)> {
            metadata.insert("duplicated".into(), json!(true));
            let doubled = records.clone().into_iter().chain(records).collect();
            Ok((doubled, metadata))
        }
    }

    struct RequireId;

    impl PreprocessStep for RequireId {
        fn name(&self) -> &str {
            "require_id"
        }

        fn apply(
            &self,
            records: Vec<Record>,
            _ctx: &StepContext<'_>,
            metadata: Metadata,
        ) -> anyhow::Result<(Vec<Record>, Metadata)> {
            if records.iter().any(|r| r.get("id").is_none()) {
                anyhow::bail!("record without id");
            }
            Ok((records, metadata))
        }
    }

    fn ctx() -> StepContext<'static> {
        StepContext {
            destination_table: "events",
            target: None,
            collection_id: None,
        }
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let chain = PreprocessChain::default();
        let (records, metadata) = chain
            .apply(vec![Record::new().with("id", 1)], &ctx(), Metadata::new())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_steps_run_in_order() {
        let chain = PreprocessChain::new(vec![Arc::new(RequireId), Arc::new(Duplicate)]);
        let (records, metadata) = chain
            .apply(vec![Record::new().with("id", 1)], &ctx(), Metadata::new())
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(metadata.get("duplicated"), Some(&json!(true)));
        assert_eq!(chain.names(), vec!["require_id", "duplicate"]);
    }

    #[test]
    fn test_failing_step_is_named() {
        let chain = PreprocessChain::new(vec![Arc::new(Duplicate), Arc::new(RequireId)]);
        let err = chain
            .apply(vec![Record::new().with("name", "x")], &ctx(), Metadata::new())
            .unwrap_err();
        match err {
            IngestError::StepRejected { step, reason } => {
                assert_eq!(step, "require_id");
                assert!(reason.contains("without id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unknown_step() {
        let registry = StepRegistry::with_builtins();
        let err = PreprocessChain::resolve(&registry, &["drop_nulls", "nope"]).unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(err.to_string().contains("'nope'"));

        let chain = PreprocessChain::resolve(&registry, &["drop_nulls"]).unwrap();
        assert_eq!(chain.len(), 1);
    }
}
