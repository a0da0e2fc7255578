//! Sender lookup by method name

use std::collections::HashMap;
use std::sync::Arc;

use super::{LogSender, NullSender, Sender};
use crate::error::{IngestError, Result};

/// Maps method names to sender implementations
///
/// Built once before the pipeline starts and read-only afterwards, so
/// workers resolve senders without locking.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `null` and `log` senders
    pub fn with_builtins() -> Self {
        let mut senders: HashMap<String, Arc<dyn Sender>> = HashMap::new();
        senders.insert("null".to_string(), Arc::new(NullSender));
        senders.insert("log".to_string(), Arc::new(LogSender));
        Self { senders }
    }

    /// Register a sender for `method`
    ///
    /// Fails with a configuration error if the method is taken.
    pub fn register<S: Sender + 'static>(&mut self, method: &str, sender: S) -> Result<()> {
        self.register_arc(method, Arc::new(sender))
    }

    pub fn register_arc(&mut self, method: &str, sender: Arc<dyn Sender>) -> Result<()> {
        if method.trim().is_empty() {
            return Err(IngestError::config("sender method name cannot be blank"));
        }
        if self.senders.contains_key(method) {
            return Err(IngestError::config(format!(
                "sender for method '{}' is already registered",
                method
            )));
        }
        self.senders.insert(method.to_string(), sender);
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<&Arc<dyn Sender>> {
        self.senders.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.senders.contains_key(method)
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<_> = self.senders.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let registry = SenderRegistry::with_builtins();
        assert_eq!(registry.methods(), vec!["log", "null"]);
        assert!(registry.contains("null"));
        assert!(registry.get("postgres").is_none());
    }

    #[test]
    fn test_register_rejects_duplicates_and_blank_names() {
        let mut registry = SenderRegistry::new();
        assert!(registry.is_empty());
        registry.register("discard", NullSender).unwrap();
        assert!(registry.register("discard", NullSender).is_err());
        assert!(registry.register(" ", NullSender).is_err());
        assert_eq!(registry.methods(), vec!["discard"]);
    }
}
