//! API-key authentication.
//!
//! Accepts requests that carry a valid key in either the configured header
//! (default `x-api-key`) or `authorization: Bearer <key>`.  The matched key's
//! label is written into request metadata under
//! [`PRINCIPAL_KEY`](super::PRINCIPAL_KEY) so later policies, including
//! response-phase ones, can see who the caller is.  Anything else is answered
//! with `401 Unauthorized` without reaching the upstream.

use super::{BUILTIN_VERSION, PRINCIPAL_KEY};
use async_trait::async_trait;
use gatehouse_kernel::{
    ImmediateResponse, PolicyAction, PolicyError, PolicyImpl, PolicyParams, RequestContext,
    RequestPolicy,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_HEADER: &str = "x-api-key";

/// A key is either a bare string or `{ key, principal }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KeyEntry {
    Bare(String),
    Labelled { key: String, principal: String },
}

impl KeyEntry {
    fn key(&self) -> &str {
        match self {
            KeyEntry::Bare(key) | KeyEntry::Labelled { key, .. } => key,
        }
    }

    fn principal(&self) -> &str {
        match self {
            KeyEntry::Bare(key) => key,
            KeyEntry::Labelled { principal, .. } => principal,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiKeyParams {
    keys: Vec<KeyEntry>,
    #[serde(default)]
    header: Option<String>,
}

impl ApiKeyParams {
    fn header(&self) -> &str {
        self.header.as_deref().unwrap_or(DEFAULT_HEADER)
    }
}

fn extract_key<'a>(ctx: &'a RequestContext, header: &str) -> Option<&'a str> {
    if let Some(key) = ctx.headers.get(header) {
        return Some(key);
    }
    ctx.headers
        .get("authorization")
        .and_then(|auth| auth.strip_prefix("Bearer "))
}

fn unauthorized(message: &str) -> PolicyAction {
    PolicyAction::ImmediateResponse(
        ImmediateResponse::json_error(401, "UNAUTHORIZED", message)
            .with_header("www-authenticate", "Bearer"),
    )
}

pub struct ApiKeyAuth;

#[async_trait]
impl RequestPolicy for ApiKeyAuth {
    async fn on_request(
        &self,
        ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: ApiKeyParams = params.parse()?;
        let Some(presented) = extract_key(ctx, params.header()) else {
            warn!(request_id = %ctx.request_id, "rejected request: missing API key");
            return Ok(unauthorized("Missing authentication credentials"));
        };

        match params.keys.iter().find(|entry| entry.key() == presented) {
            Some(entry) => {
                let principal = entry.principal().to_string();
                ctx.metadata.set(PRINCIPAL_KEY, &principal);
                Ok(PolicyAction::Continue)
            }
            None => {
                warn!(request_id = %ctx.request_id, "rejected request: invalid API key");
                Ok(unauthorized("Invalid API key"))
            }
        }
    }
}

fn validate(params: &PolicyParams) -> Result<(), PolicyError> {
    let parsed: ApiKeyParams = params.parse()?;
    if parsed.keys.is_empty() {
        return Err(PolicyError::InvalidParameters(
            "'keys' must list at least one key".into(),
        ));
    }
    if parsed.keys.iter().any(|k| k.key().is_empty()) {
        return Err(PolicyError::InvalidParameters("empty API key".into()));
    }
    Ok(())
}

pub fn implementation() -> PolicyImpl {
    PolicyImpl::new("api-key-auth", BUILTIN_VERSION)
        .with_request(Arc::new(ApiKeyAuth))
        .with_validator(Arc::new(validate))
}
