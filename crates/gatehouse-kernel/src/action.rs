//! What a policy asks the kernel to do.
//!
//! A policy returns one [`PolicyAction`] per invocation:
//!
//! ```text
//! Continue             nothing to change
//! Mutate(Mutations)    header set/append/remove and/or body replacement
//! ImmediateResponse    stop the chain and answer the client directly
//! ```

use serde::{Deserialize, Serialize};

/// Header operations requested by one policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMutations {
    /// Overwrite semantics: the header ends up with exactly this value.
    pub set: Vec<(String, String)>,
    /// Additive semantics: the value is added next to existing ones.
    pub append: Vec<(String, String)>,
    /// Header names to drop.
    pub remove: Vec<String>,
}

impl HeaderMutations {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.append.is_empty() && self.remove.is_empty()
    }
}

/// A mutation bag.
///
/// `path` and `method` only apply on the request path; `status` only on the
/// response path.  The translator ignores fields that do not apply to the
/// phase being answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutations {
    pub headers: HeaderMutations,
    /// Full replacement of the message body.
    pub body: Option<Vec<u8>>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

impl Mutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set.push((name.into(), value.into()));
        self
    }

    pub fn append_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append.push((name.into(), value.into()));
        self
    }

    pub fn remove_header(mut self, name: impl Into<String>) -> Self {
        self.headers.remove.push(name.into());
        self
    }

    pub fn replace_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn rewrite_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn rewrite_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn override_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.body.is_none()
            && self.path.is_none()
            && self.method.is_none()
            && self.status.is_none()
    }
}

/// A terminal response produced by a policy, bypassing the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmediateResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Free-form diagnostic recorded by the proxy alongside the response.
    pub details: Option<String>,
}

impl ImmediateResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            details: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// JSON error envelope `{"error":{"code":..,"message":..}}`.
    pub fn json_error(status: u16, code: &str, message: &str) -> Self {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .with_details(code)
    }
}

/// Instruction returned by a policy for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyAction {
    /// Nothing to change; carry on with the next policy.
    Continue,
    /// Apply these mutations and carry on.
    Mutate(Mutations),
    /// Short-circuit: stop the chain and answer with this response.
    ImmediateResponse(ImmediateResponse),
}

impl PolicyAction {
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, PolicyAction::ImmediateResponse(_))
    }
}
