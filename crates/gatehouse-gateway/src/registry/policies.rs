//! In-memory [`PolicyRegistry`] implementation.

use crate::error::{GatewayError, GatewayResult};
use gatehouse_kernel::{PolicyImpl, PolicyRegistry};
use std::collections::HashMap;

/// [`PolicyRegistry`] backed by a `HashMap` keyed on `(name, version)`.
///
/// Populated once by the composition root and then shared read-only with
/// the loader.
#[derive(Debug, Default)]
pub struct InMemoryPolicyRegistry {
    store: HashMap<(String, String), PolicyImpl>,
}

impl InMemoryPolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in policy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for imp in crate::policies::builtins() {
            registry.store.insert(
                (imp.name().to_string(), imp.version().to_string()),
                imp,
            );
        }
        registry
    }

    pub fn register(&mut self, imp: PolicyImpl) -> GatewayResult<()> {
        let key = (imp.name().to_string(), imp.version().to_string());
        if self.store.contains_key(&key) {
            return Err(GatewayError::DuplicatePolicy {
                name: key.0,
                version: key.1,
            });
        }
        self.store.insert(key, imp);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl PolicyRegistry for InMemoryPolicyRegistry {
    fn get_implementation(&self, name: &str, version: &str) -> Option<PolicyImpl> {
        self.store
            .get(&(name.to_string(), version.to_string()))
            .cloned()
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self.store.keys().cloned().collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::BUILTIN_VERSION;

    #[test]
    fn builtins_are_registered() {
        let reg = InMemoryPolicyRegistry::with_builtins();
        for name in [
            "modify-headers",
            "api-key-auth",
            "rate-limit",
            "access-log",
            "respond",
            "replace-body",
        ] {
            assert!(
                reg.get_implementation(name, BUILTIN_VERSION).is_some(),
                "{name} missing"
            );
        }
        assert!(reg.get_implementation("respond", "v9").is_none());
        assert_eq!(reg.list().len(), reg.len());
    }

    #[test]
    fn duplicate_register_returns_error() {
        let mut reg = InMemoryPolicyRegistry::with_builtins();
        let dup = PolicyImpl::new("respond", BUILTIN_VERSION);
        assert!(matches!(
            reg.register(dup),
            Err(GatewayError::DuplicatePolicy { .. })
        ));
        assert!(reg.register(PolicyImpl::new("respond", "v2.0.0")).is_ok());
    }
}
