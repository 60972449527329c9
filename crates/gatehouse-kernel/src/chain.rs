//! Policy chain model.
//!
//! A [`PolicyChain`] is the unit of routing configuration: the ordered
//! request-path and response-path policies of one route plus the body
//! requirements derived from them.  Chains are built once from validated
//! specs and never mutated afterwards; reconfiguration replaces them.

use crate::condition::Condition;
use crate::policy::{PolicyImpl, PolicyParams, RequestPolicy, ResponsePolicy};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Declarative identity of one policy instance on a route.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySpec {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub execution_condition: Option<Condition>,
    pub parameters: PolicyParams,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            execution_condition: None,
            parameters: PolicyParams::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: PolicyParams) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.execution_condition = Some(condition);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A policy implementation bound to the spec it was configured with.
pub struct BoundPolicy<P: ?Sized> {
    pub spec: Arc<PolicySpec>,
    pub policy: Arc<P>,
}

impl<P: ?Sized> Clone for BoundPolicy<P> {
    fn clone(&self) -> Self {
        Self {
            spec: Arc::clone(&self.spec),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<P: ?Sized> fmt::Debug for BoundPolicy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundPolicy")
            .field("name", &self.spec.name)
            .field("version", &self.spec.version)
            .finish()
    }
}

pub type BoundRequestPolicy = BoundPolicy<dyn RequestPolicy>;
pub type BoundResponsePolicy = BoundPolicy<dyn ResponsePolicy>;

/// Ordered request/response policies of one route.
#[derive(Debug, Clone, Default)]
pub struct PolicyChain {
    request_policies: Vec<BoundRequestPolicy>,
    response_policies: Vec<BoundResponsePolicy>,
    specs: Vec<Arc<PolicySpec>>,
    requires_request_body: bool,
    requires_response_body: bool,
}

impl PolicyChain {
    /// A chain that does nothing in either direction.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a chain from resolved `(spec, implementation)` pairs in
    /// declaration order.
    ///
    /// Each implementation joins the request list, the response list, or
    /// both, according to which halves it provides.  Body requirements are
    /// accumulated from the declared mode of the side it joins.  Disabled
    /// specs are dropped here and contribute nothing.
    pub fn build(entries: impl IntoIterator<Item = (PolicySpec, PolicyImpl)>) -> Self {
        let mut chain = Self::default();
        for (spec, imp) in entries {
            if !spec.enabled {
                tracing::debug!(policy = %spec.name, version = %spec.version, "skipping disabled policy");
                continue;
            }
            let spec = Arc::new(spec);
            let mode = imp.mode();
            if let Some(policy) = imp.request() {
                chain.request_policies.push(BoundPolicy {
                    spec: Arc::clone(&spec),
                    policy: Arc::clone(policy),
                });
                chain.requires_request_body |= mode.request_body.needs_body();
            }
            if let Some(policy) = imp.response() {
                chain.response_policies.push(BoundPolicy {
                    spec: Arc::clone(&spec),
                    policy: Arc::clone(policy),
                });
                chain.requires_response_body |= mode.response_body.needs_body();
            }
            chain.specs.push(spec);
        }
        chain
    }

    pub fn request_policies(&self) -> &[BoundRequestPolicy] {
        &self.request_policies
    }

    pub fn response_policies(&self) -> &[BoundResponsePolicy] {
        &self.response_policies
    }

    /// Specs of every enabled policy, in declaration order.
    pub fn specs(&self) -> &[Arc<PolicySpec>] {
        &self.specs
    }

    pub fn requires_request_body(&self) -> bool {
        self.requires_request_body
    }

    pub fn requires_response_body(&self) -> bool {
        self.requires_response_body
    }

    pub fn has_request_policies(&self) -> bool {
        !self.request_policies.is_empty()
    }

    pub fn has_response_policies(&self) -> bool {
        !self.response_policies.is_empty()
    }

    /// Introspection summary.
    pub fn summary(&self) -> ChainSummary {
        let names = |specs: Vec<&Arc<PolicySpec>>| -> Vec<String> {
            specs
                .into_iter()
                .map(|s| format!("{}@{}", s.name, s.version))
                .collect()
        };
        ChainSummary {
            request_policies: names(self.request_policies.iter().map(|b| &b.spec).collect()),
            response_policies: names(self.response_policies.iter().map(|b| &b.spec).collect()),
            requires_request_body: self.requires_request_body,
            requires_response_body: self.requires_response_body,
        }
    }
}

/// Serializable view of a chain for debugging endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub request_policies: Vec<String>,
    pub response_policies: Vec<String>,
    pub requires_request_body: bool,
    pub requires_response_body: bool,
}
