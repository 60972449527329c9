//! Header set / append / remove, per direction.
//!
//! ```yaml
//! - name: modify-headers
//!   version: v1.0.0
//!   parameters:
//!     request:
//!       set: { x-gateway: gatehouse }
//!       remove: [x-internal-debug]
//!     response:
//!       append: { via: gatehouse }
//! ```

use super::{BUILTIN_VERSION, parses_as};
use async_trait::async_trait;
use gatehouse_kernel::{
    Mutations, PolicyAction, PolicyError, PolicyImpl, PolicyParams, RequestContext,
    RequestPolicy, ResponseContext, ResponsePolicy,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderOps {
    #[serde(default)]
    set: BTreeMap<String, String>,
    #[serde(default)]
    append: BTreeMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

impl HeaderOps {
    fn to_mutations(&self) -> Mutations {
        let mut m = Mutations::new();
        for (name, value) in &self.set {
            m = m.set_header(name, value);
        }
        for (name, value) in &self.append {
            m = m.append_header(name, value);
        }
        for name in &self.remove {
            m = m.remove_header(name);
        }
        m
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModifyHeadersParams {
    #[serde(default)]
    request: Option<HeaderOps>,
    #[serde(default)]
    response: Option<HeaderOps>,
}

fn action_for(ops: Option<&HeaderOps>) -> PolicyAction {
    match ops.map(HeaderOps::to_mutations) {
        Some(m) if !m.is_empty() => PolicyAction::Mutate(m),
        _ => PolicyAction::Continue,
    }
}

pub struct ModifyHeaders;

#[async_trait]
impl RequestPolicy for ModifyHeaders {
    async fn on_request(
        &self,
        _ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: ModifyHeadersParams = params.parse()?;
        Ok(action_for(params.request.as_ref()))
    }
}

#[async_trait]
impl ResponsePolicy for ModifyHeaders {
    async fn on_response(
        &self,
        _ctx: &mut ResponseContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: ModifyHeadersParams = params.parse()?;
        Ok(action_for(params.response.as_ref()))
    }
}

pub fn implementation() -> PolicyImpl {
    let policy = Arc::new(ModifyHeaders);
    PolicyImpl::new("modify-headers", BUILTIN_VERSION)
        .with_request(policy.clone())
        .with_response(policy)
        .with_validator(parses_as::<ModifyHeadersParams>())
}
