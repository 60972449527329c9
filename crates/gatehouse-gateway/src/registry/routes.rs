//! Route → policy chain registry.
//!
//! A single reader/writer lock guards the whole map.  Lookups take the shared
//! lock, every mutation takes the exclusive lock, and a bulk replacement is
//! one critical section, so a reader never sees half of a reload.  Chains are
//! handed out as `Arc`s: a stream keeps the chain it resolved even if the
//! entry is replaced while the stream is in flight.

use gatehouse_kernel::PolicyChain;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: RwLock<HashMap<String, Arc<PolicyChain>>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the chain for a route.  `None` means "no policy processing",
    /// not an error.
    pub fn lookup(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        self.routes.read().get(route_key).cloned()
    }

    /// Insert or replace one entry, returning the previous chain.
    pub fn register(
        &self,
        route_key: impl Into<String>,
        chain: Arc<PolicyChain>,
    ) -> Option<Arc<PolicyChain>> {
        self.routes.write().insert(route_key.into(), chain)
    }

    pub fn unregister(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        self.routes.write().remove(route_key)
    }

    /// Swap the entire route set in one critical section.  Keys absent from
    /// `entries` are gone afterwards.
    pub fn replace_all(&self, entries: HashMap<String, Arc<PolicyChain>>) {
        *self.routes.write() = entries;
    }

    /// Insert or replace every entry in one critical section, leaving keys
    /// absent from `entries` untouched.
    pub fn merge_all(&self, entries: HashMap<String, Arc<PolicyChain>>) {
        self.routes.write().extend(entries);
    }

    /// Point-in-time copy of the map.  Mutating the copy does not affect the
    /// registry.
    pub fn snapshot(&self) -> HashMap<String, Arc<PolicyChain>> {
        self.routes.read().clone()
    }

    pub fn route_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}
