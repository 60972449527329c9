//! Whole-body replacement.
//!
//! Declares `buffer` in both directions so the proxy hands over the complete
//! body before the policy runs.

use super::{BUILTIN_VERSION, parses_as};
use async_trait::async_trait;
use gatehouse_kernel::{
    BodyRequirement, Mutations, PolicyAction, PolicyError, PolicyImpl, PolicyMode, PolicyParams,
    RequestContext, RequestPolicy, ResponseContext, ResponsePolicy,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplaceBodyParams {
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

impl ReplaceBodyParams {
    fn action(&self, replacement: Option<&String>) -> PolicyAction {
        let Some(body) = replacement else {
            return PolicyAction::Continue;
        };
        let mut m = Mutations::new().replace_body(body.as_bytes());
        if let Some(ct) = &self.content_type {
            m = m.set_header("content-type", ct);
        }
        PolicyAction::Mutate(m)
    }
}

pub struct ReplaceBody;

#[async_trait]
impl RequestPolicy for ReplaceBody {
    async fn on_request(
        &self,
        _ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: ReplaceBodyParams = params.parse()?;
        Ok(params.action(params.request.as_ref()))
    }
}

#[async_trait]
impl ResponsePolicy for ReplaceBody {
    async fn on_response(
        &self,
        _ctx: &mut ResponseContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: ReplaceBodyParams = params.parse()?;
        Ok(params.action(params.response.as_ref()))
    }
}

pub fn implementation() -> PolicyImpl {
    let policy = Arc::new(ReplaceBody);
    PolicyImpl::new("replace-body", BUILTIN_VERSION)
        .with_mode(PolicyMode::new(
            BodyRequirement::Buffer,
            BodyRequirement::Buffer,
        ))
        .with_request(policy.clone())
        .with_response(policy)
        .with_validator(parses_as::<ReplaceBodyParams>())
}
