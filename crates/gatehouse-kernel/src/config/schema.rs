//! Route file schema and validation.
//!
//! [`RouteFile`] is the declarative source: a list of routes, each with an
//! ordered list of policy instances.  [`RouteFile::validate`] checks every
//! structural invariant and resolves every policy against a
//! [`PolicyRegistry`] *before* anything is built, so a bad entry anywhere
//! rejects the whole file.

use crate::chain::PolicySpec;
use crate::condition::Condition;
use crate::error::{ConfigError, ConfigResult};
use crate::policy::{PolicyImpl, PolicyParams, PolicyRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level route file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteFile {
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// One route and its policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default, alias = "routeKey")]
    pub route_key: String,
    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
}

/// One policy instance as written in the file.
///
/// `name` and `version` are optional here so that a missing field is
/// reported as a validation error naming the route, not as a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "executionCondition")]
    pub execution_condition: Option<String>,
    #[serde(default)]
    pub parameters: PolicyParams,
}

fn default_enabled() -> bool {
    true
}

impl PolicyEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            enabled: true,
            execution_condition: None,
            parameters: PolicyParams::new(),
        }
    }
}

/// A route whose policies all resolved.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route_key: String,
    pub policies: Vec<(PolicySpec, PolicyImpl)>,
}

impl RouteFile {
    pub fn with_route(mut self, route: RouteEntry) -> Self {
        self.routes.push(route);
        self
    }

    /// Validate every entry and resolve every policy.
    ///
    /// Checks performed, per route in order:
    /// 1. Route key is non-empty.
    /// 2. Route key is unique within the file.
    /// 3. Each policy has a `name` and a `version`.
    /// 4. Each `(name, version)` resolves in the registry.
    /// 5. The implementation accepts the parameters.
    /// 6. The execution condition, if any, parses.
    ///
    /// Returns the first failure.
    pub fn validate(&self, registry: &dyn PolicyRegistry) -> ConfigResult<Vec<ResolvedRoute>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut resolved = Vec::with_capacity(self.routes.len());

        for (index, route) in self.routes.iter().enumerate() {
            let key = route.route_key.trim();
            if key.is_empty() {
                return Err(ConfigError::EmptyRouteKey { index });
            }
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateRoute(key.to_string()));
            }

            let mut policies = Vec::with_capacity(route.policies.len());
            for (pindex, entry) in route.policies.iter().enumerate() {
                policies.push(resolve_entry(key, pindex, entry, registry)?);
            }
            resolved.push(ResolvedRoute {
                route_key: key.to_string(),
                policies,
            });
        }
        Ok(resolved)
    }
}

fn resolve_entry(
    route: &str,
    index: usize,
    entry: &PolicyEntry,
    registry: &dyn PolicyRegistry,
) -> ConfigResult<(PolicySpec, PolicyImpl)> {
    let name = match entry.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => {
            return Err(ConfigError::MissingPolicyName {
                route: route.to_string(),
                index,
            });
        }
    };
    let version = match entry.version.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => {
            return Err(ConfigError::MissingPolicyVersion {
                route: route.to_string(),
                policy: name.to_string(),
            });
        }
    };

    let imp = registry
        .get_implementation(name, version)
        .ok_or_else(|| ConfigError::UnknownPolicy {
            route: route.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })?;

    imp.validate_params(&entry.parameters)
        .map_err(|e| ConfigError::InvalidParameters {
            route: route.to_string(),
            policy: name.to_string(),
            reason: e.to_string(),
        })?;

    let execution_condition = match entry.execution_condition.as_deref().map(str::trim) {
        Some(src) if !src.is_empty() => {
            Some(
                Condition::parse(src).map_err(|reason| ConfigError::InvalidCondition {
                    route: route.to_string(),
                    policy: name.to_string(),
                    reason,
                })?,
            )
        }
        _ => None,
    };

    let spec = PolicySpec {
        name: name.to_string(),
        version: version.to_string(),
        enabled: entry.enabled,
        execution_condition,
        parameters: entry.parameters.clone(),
    };
    Ok((spec, imp))
}
