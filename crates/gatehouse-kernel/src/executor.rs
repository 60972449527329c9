//! Chain executor contract.
//!
//! The executor runs the policies of one phase and reports, per policy,
//! whether it was skipped, failed, or produced an action.  The kernel only
//! consumes the [`ExecutionResult`]; how the policies are scheduled is up to
//! the implementation.

use crate::action::{ImmediateResponse, PolicyAction};
use crate::chain::{BoundRequestPolicy, BoundResponsePolicy};
use crate::context::{RequestContext, ResponseContext};
use crate::error::PolicyError;
use async_trait::async_trait;

/// What happened to one policy of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub name: String,
    pub version: String,
    /// Disabled by its execution condition; contributes nothing.
    pub skipped: bool,
    pub error: Option<PolicyError>,
    pub action: Option<PolicyAction>,
}

impl PolicyOutcome {
    pub fn skipped(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            skipped: true,
            error: None,
            action: None,
        }
    }

    pub fn failed(name: impl Into<String>, version: impl Into<String>, error: PolicyError) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            skipped: false,
            error: Some(error),
            action: None,
        }
    }

    pub fn completed(
        name: impl Into<String>,
        version: impl Into<String>,
        action: PolicyAction,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            skipped: false,
            error: None,
            action: Some(action),
        }
    }
}

/// Result of running one phase of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// One entry per policy that was reached, in chain order.
    pub outcomes: Vec<PolicyOutcome>,
    /// A policy answered with an immediate response.
    pub short_circuited: bool,
    /// The immediate response that stopped the chain.
    pub final_action: Option<ImmediateResponse>,
}

impl ExecutionResult {
    /// First execution error, if any policy failed.
    pub fn first_error(&self) -> Option<(&PolicyOutcome, &PolicyError)> {
        self.outcomes
            .iter()
            .find_map(|o| o.error.as_ref().map(|e| (o, e)))
    }

    pub fn has_error(&self) -> bool {
        self.first_error().is_some()
    }
}

/// Runs the policies of one phase.
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    async fn execute_request_policies(
        &self,
        policies: &[BoundRequestPolicy],
        ctx: &mut RequestContext,
    ) -> ExecutionResult;

    async fn execute_response_policies(
        &self,
        policies: &[BoundResponsePolicy],
        ctx: &mut ResponseContext,
    ) -> ExecutionResult;
}
