//! Structured access log.
//!
//! Stores the request start time in request metadata and emits one log line
//! per exchange from the response path, carrying the latency and status.

use super::{BUILTIN_VERSION, PRINCIPAL_KEY};
use async_trait::async_trait;
use gatehouse_kernel::{
    PolicyAction, PolicyError, PolicyImpl, PolicyParams, RequestContext, RequestPolicy,
    ResponseContext, ResponsePolicy,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Metadata key holding the request start time, in Unix milliseconds.
pub const START_KEY: &str = "access_log.start_ms";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct AccessLog;

#[async_trait]
impl RequestPolicy for AccessLog {
    async fn on_request(
        &self,
        ctx: &mut RequestContext,
        _params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        ctx.metadata.set(START_KEY, &now_ms());
        Ok(PolicyAction::Continue)
    }
}

#[async_trait]
impl ResponsePolicy for AccessLog {
    async fn on_response(
        &self,
        ctx: &mut ResponseContext,
        _params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let latency_ms = ctx
            .metadata
            .get::<u64>(START_KEY)
            .map(|start| now_ms().saturating_sub(start));
        let principal: Option<String> = ctx.metadata.get(PRINCIPAL_KEY);

        info!(
            target: "gatehouse::access",
            request_id = %ctx.request_id,
            route_key = %ctx.route_key,
            method = %ctx.request.method,
            path = %ctx.request.path,
            status = ctx.status,
            latency_ms = ?latency_ms,
            principal = principal.as_deref().unwrap_or("-"),
            "request completed"
        );
        Ok(PolicyAction::Continue)
    }
}

pub fn implementation() -> PolicyImpl {
    let policy = Arc::new(AccessLog);
    PolicyImpl::new("access-log", BUILTIN_VERSION)
        .with_request(policy.clone())
        .with_response(policy)
}
