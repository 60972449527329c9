//! Default chain executor.
//!
//! Runs the bound policies of one phase one after another, in chain order,
//! against the working context.  Each `Mutate` action is applied to the
//! context before the next policy runs, so later policies observe earlier
//! mutations.  Execution stops at the first short-circuit or the first
//! error.

use async_trait::async_trait;
use gatehouse_kernel::{
    BoundPolicy, BoundRequestPolicy, BoundResponsePolicy, ChainExecutor, ExecutionResult,
    Mutations, PolicyAction, PolicyError, PolicyOutcome, RequestContext, ResponseContext,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// A context a phase's policies run against.
trait PhaseContext {
    const NAME: &'static str;
    fn request_id(&self) -> &str;
    fn apply(&mut self, mutations: &Mutations);
}

impl PhaseContext for RequestContext {
    const NAME: &'static str = "request";

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn apply(&mut self, mutations: &Mutations) {
        RequestContext::apply(self, mutations);
    }
}

impl PhaseContext for ResponseContext {
    const NAME: &'static str = "response";

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn apply(&mut self, mutations: &Mutations) {
        ResponseContext::apply(self, mutations);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SequentialChainExecutor {
    timeout: Option<Duration>,
}

impl SequentialChainExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each policy invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `0` disables the per-policy timeout.
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            self
        } else {
            self.with_timeout(Duration::from_millis(timeout_ms))
        }
    }

    async fn guard<F>(&self, policy: &str, fut: F) -> Result<PolicyAction, PolicyError>
    where
        F: Future<Output = Result<PolicyAction, PolicyError>>,
    {
        match self.timeout {
            None => fut.await,
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| {
                    Err(PolicyError::Timeout {
                        policy: policy.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }),
        }
    }

    /// Record one policy's result, applying mutations.  Returns `false` when
    /// the chain must stop.
    fn record<C, P>(
        bound: &BoundPolicy<P>,
        ctx: &mut C,
        outcome: Result<PolicyAction, PolicyError>,
        result: &mut ExecutionResult,
    ) -> bool
    where
        C: PhaseContext,
        P: ?Sized,
    {
        let spec = &bound.spec;
        match outcome {
            Ok(PolicyAction::ImmediateResponse(resp)) => {
                debug!(
                    request_id = %ctx.request_id(),
                    policy = %spec.name,
                    phase = C::NAME,
                    status = resp.status,
                    "policy short-circuited"
                );
                result.short_circuited = true;
                result.final_action = Some(resp.clone());
                result.outcomes.push(PolicyOutcome::completed(
                    &spec.name,
                    &spec.version,
                    PolicyAction::ImmediateResponse(resp),
                ));
                false
            }
            Ok(action) => {
                if let PolicyAction::Mutate(m) = &action {
                    ctx.apply(m);
                }
                result
                    .outcomes
                    .push(PolicyOutcome::completed(&spec.name, &spec.version, action));
                true
            }
            Err(err) => {
                warn!(
                    request_id = %ctx.request_id(),
                    policy = %spec.name,
                    version = %spec.version,
                    phase = C::NAME,
                    error = %err,
                    "policy execution failed"
                );
                result
                    .outcomes
                    .push(PolicyOutcome::failed(&spec.name, &spec.version, err));
                false
            }
        }
    }
}

#[async_trait]
impl ChainExecutor for SequentialChainExecutor {
    async fn execute_request_policies(
        &self,
        policies: &[BoundRequestPolicy],
        ctx: &mut RequestContext,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        for bound in policies {
            let spec = &bound.spec;
            if let Some(cond) = &spec.execution_condition {
                if !cond.evaluate(&*ctx) {
                    debug!(request_id = %ctx.request_id, policy = %spec.name, phase = "request", "condition false, skipping");
                    result
                        .outcomes
                        .push(PolicyOutcome::skipped(&spec.name, &spec.version));
                    continue;
                }
            }
            let outcome = self
                .guard(&spec.name, bound.policy.on_request(ctx, &spec.parameters))
                .await;
            if !Self::record(bound, ctx, outcome, &mut result) {
                break;
            }
        }
        result
    }

    async fn execute_response_policies(
        &self,
        policies: &[BoundResponsePolicy],
        ctx: &mut ResponseContext,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        for bound in policies {
            let spec = &bound.spec;
            if let Some(cond) = &spec.execution_condition {
                if !cond.evaluate(&*ctx) {
                    debug!(request_id = %ctx.request_id, policy = %spec.name, phase = "response", "condition false, skipping");
                    result
                        .outcomes
                        .push(PolicyOutcome::skipped(&spec.name, &spec.version));
                    continue;
                }
            }
            let outcome = self
                .guard(&spec.name, bound.policy.on_response(ctx, &spec.parameters))
                .await;
            if !Self::record(bound, ctx, outcome, &mut result) {
                break;
            }
        }
        result
    }
}
