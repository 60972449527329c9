//! Fixed response, answered without contacting the upstream.
//!
//! Useful for maintenance pages, mocked endpoints and blocking a route
//! outright.  Usually paired with an `execution_condition`.

use super::BUILTIN_VERSION;
use async_trait::async_trait;
use gatehouse_kernel::{
    ImmediateResponse, PolicyAction, PolicyError, PolicyImpl, PolicyParams, RequestContext,
    RequestPolicy,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

fn default_status() -> u16 {
    200
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RespondParams {
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: String,
}

pub struct Respond;

#[async_trait]
impl RequestPolicy for Respond {
    async fn on_request(
        &self,
        _ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: RespondParams = params.parse()?;
        let mut resp = ImmediateResponse::new(params.status)
            .with_body(params.body.into_bytes())
            .with_details("respond");
        for (name, value) in params.headers {
            resp = resp.with_header(name, value);
        }
        Ok(PolicyAction::ImmediateResponse(resp))
    }
}

fn validate(params: &PolicyParams) -> Result<(), PolicyError> {
    let parsed: RespondParams = params.parse()?;
    if !(100..=599).contains(&parsed.status) {
        return Err(PolicyError::InvalidParameters(format!(
            "'status' {} is not a valid HTTP status",
            parsed.status
        )));
    }
    Ok(())
}

pub fn implementation() -> PolicyImpl {
    PolicyImpl::new("respond", BUILTIN_VERSION)
        .with_request(Arc::new(Respond))
        .with_validator(Arc::new(validate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn always_short_circuits() {
        let params = PolicyParams::new()
            .with("status", json!(503))
            .with("headers", json!({ "content-type": "text/plain" }))
            .with("body", json!("down for maintenance"));
        let mut ctx = RequestContext::new("req-1", "r");
        let action = Respond.on_request(&mut ctx, &params).await.unwrap();
        let PolicyAction::ImmediateResponse(resp) = action else {
            panic!("expected immediate response");
        };
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body, b"down for maintenance");
        assert_eq!(
            resp.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn status_is_range_checked() {
        let imp = implementation();
        assert!(imp.validate_params(&PolicyParams::new()).is_ok());
        assert!(
            imp.validate_params(&PolicyParams::new().with("status", json!(42)))
                .is_err()
        );
    }
}
