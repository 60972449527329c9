//! Request-scoped metadata shared between the phases of one exchange.
//!
//! A single [`Metadata`] value is created per request/response cycle and is
//! owned by the execution context.  It is handed to each policy through the
//! `&mut` phase context, then moved from the request context into the
//! response context, so a value written by a request-phase policy (say the
//! authenticated subject) is readable by every later policy of the same
//! cycle, including response-phase ones.  Nothing is shared between cycles.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

/// Typed key/value scratch space for one request/response cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    values: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a typed value, returning `None` if absent or if it does not
    /// deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Raw JSON value for `key`.
    pub fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Write a serializable value.  Values that fail to serialize are dropped.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.values.insert(key.into(), v);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
