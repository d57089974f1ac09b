//! Cross-pass analyzer knowledge kept per session.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Persistent key/value store shared by every pass run in one session.
///
/// Passes work on a copy; the copy replaces the session's store only when the
/// whole pass succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalyzerState {
    entries: BTreeMap<String, Value>,
}

impl AnalyzerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Add `by` to an integer counter, returning the new total.
    pub fn increment(&mut self, key: &str, by: u64) -> u64 {
        let current = self.counter(key);
        let total = current.saturating_add(by);
        self.entries.insert(key.to_string(), Value::from(total));
        total
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.entries.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
