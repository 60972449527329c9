//! Configuration loader.
//!
//! Validates a [`RouteFile`] against the policy registry, builds one
//! [`PolicyChain`] per route, and only then swaps the chains into the
//! [`RouteRegistry`] in a single critical section.  Any failure leaves the
//! previously active routes untouched.

use crate::registry::RouteRegistry;
use gatehouse_kernel::config::{self, RouteFile, RouteFileFormat};
use gatehouse_kernel::{ConfigResult, PolicyChain, PolicyRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// What happens to routes that are registered but absent from a new source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// The registry ends up holding exactly the routes in the source.
    #[default]
    Replace,
    /// Routes in the source are added or replaced; others are kept.
    Merge,
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub mode: ReloadMode,
    /// Routes contained in the source.
    pub routes_loaded: usize,
    /// Routes in the registry after the swap.
    pub routes_active: usize,
}

pub struct ConfigLoader {
    routes: Arc<RouteRegistry>,
    policies: Arc<dyn PolicyRegistry>,
    mode: ReloadMode,
}

impl ConfigLoader {
    pub fn new(routes: Arc<RouteRegistry>, policies: Arc<dyn PolicyRegistry>) -> Self {
        Self {
            routes,
            policies,
            mode: ReloadMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ReloadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ReloadMode {
        self.mode
    }

    /// Validate, build and swap.
    pub fn load(&self, source: &RouteFile) -> ConfigResult<LoadSummary> {
        let resolved = source.validate(self.policies.as_ref())?;

        let chains: HashMap<String, Arc<PolicyChain>> = resolved
            .into_iter()
            .map(|route| {
                let chain = PolicyChain::build(route.policies);
                (route.route_key, Arc::new(chain))
            })
            .collect();
        let routes_loaded = chains.len();

        match self.mode {
            ReloadMode::Replace => self.routes.replace_all(chains),
            ReloadMode::Merge => self.routes.merge_all(chains),
        }
        let summary = LoadSummary {
            mode: self.mode,
            routes_loaded,
            routes_active: self.routes.len(),
        };
        info!(
            mode = ?summary.mode,
            routes_loaded = summary.routes_loaded,
            routes_active = summary.routes_active,
            "route configuration applied"
        );
        Ok(summary)
    }

    pub fn load_str(&self, content: &str, format: RouteFileFormat) -> ConfigResult<LoadSummary> {
        let source = config::from_str(content, format)?;
        self.load(&source)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> ConfigResult<LoadSummary> {
        let path = path.as_ref();
        let source = config::load_route_file(path)?;
        info!(path = %path.display(), "loading route file");
        self.load(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryPolicyRegistry;
    use gatehouse_kernel::ConfigError;

    const INITIAL: &str = r#"
routes:
  - route_key: orders
    policies:
      - name: modify-headers
        version: v1.0.0
        parameters:
          request: { set: { x-gen: "1" } }
  - route_key: users
    policies:
      - name: access-log
        version: v1.0.0
"#;

    fn loader(mode: ReloadMode) -> (ConfigLoader, Arc<RouteRegistry>) {
        let routes = Arc::new(RouteRegistry::new());
        let loader = ConfigLoader::new(
            Arc::clone(&routes),
            Arc::new(InMemoryPolicyRegistry::with_builtins()),
        )
        .with_mode(mode);
        (loader, routes)
    }

    #[test]
    fn load_builds_chains() {
        let (loader, routes) = loader(ReloadMode::Replace);
        let summary = loader.load_str(INITIAL, RouteFileFormat::Yaml).unwrap();
        assert_eq!(summary.routes_loaded, 2);
        assert_eq!(summary.routes_active, 2);

        let orders = routes.lookup("orders").unwrap();
        assert_eq!(orders.request_policies().len(), 1);
        assert_eq!(orders.response_policies().len(), 1);
        assert!(!orders.requires_request_body());
    }

    #[test]
    fn unknown_policy_leaves_previous_routes_in_force() {
        let (loader, routes) = loader(ReloadMode::Replace);
        loader.load_str(INITIAL, RouteFileFormat::Yaml).unwrap();
        let before = routes.lookup("orders").unwrap();

        let bad = r#"
routes:
  - route_key: orders
    policies:
      - { name: respond, version: v1.0.0 }
  - route_key: fresh
    policies:
      - { name: no-such-policy, version: v1.0.0 }
"#;
        let err = loader.load_str(bad, RouteFileFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPolicy { ref name, .. } if name == "no-such-policy"));
        assert!(err.to_string().contains("fresh"));

        assert_eq!(routes.route_keys(), vec!["orders", "users"]);
        assert!(Arc::ptr_eq(&before, &routes.lookup("orders").unwrap()));
        assert!(routes.lookup("fresh").is_none());
    }

    #[test]
    fn missing_version_fails_whole_load() {
        let (loader, routes) = loader(ReloadMode::Replace);
        let bad = "routes:\n  - route_key: a\n    policies:\n      - { name: respond }\n";
        assert!(matches!(
            loader.load_str(bad, RouteFileFormat::Yaml),
            Err(ConfigError::MissingPolicyVersion { .. })
        ));
        assert!(routes.is_empty());
    }

    #[test]
    fn replace_mode_removes_omitted_routes() {
        let (loader, routes) = loader(ReloadMode::Replace);
        loader.load_str(INITIAL, RouteFileFormat::Yaml).unwrap();
        let summary = loader
            .load_str(
                "routes:\n  - route_key: orders\n    policies: []\n",
                RouteFileFormat::Yaml,
            )
            .unwrap();
        assert_eq!(summary.routes_active, 1);
        assert!(routes.lookup("users").is_none());
        assert!(!routes.lookup("orders").unwrap().has_request_policies());
    }

    #[test]
    fn merge_mode_keeps_omitted_routes() {
        let (loader, routes) = loader(ReloadMode::Merge);
        loader.load_str(INITIAL, RouteFileFormat::Yaml).unwrap();
        let summary = loader
            .load_str(
                "routes:\n  - route_key: orders\n    policies: []\n",
                RouteFileFormat::Yaml,
            )
            .unwrap();
        assert_eq!(summary.routes_loaded, 1);
        assert_eq!(summary.routes_active, 2);
        assert!(routes.lookup("users").is_some());
        assert!(!routes.lookup("orders").unwrap().has_request_policies());
    }

    #[test]
    fn disabled_policies_do_not_force_buffering() {
        let (loader, routes) = loader(ReloadMode::Replace);
        let source = r#"
routes:
  - route_key: r
    policies:
      - { name: replace-body, version: v1.0.0, enabled: false, parameters: { request: "x" } }
"#;
        loader.load_str(source, RouteFileFormat::Yaml).unwrap();
        let chain = routes.lookup("r").unwrap();
        assert!(!chain.requires_request_body());
        assert!(!chain.has_request_policies());
    }
}
