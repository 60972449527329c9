//! Policy contracts.
//!
//! A policy participates in the request path, the response path, or both.
//! Instead of probing an implementation for its capabilities on every
//! request, a [`PolicyImpl`] carries an optional [`RequestPolicy`] and an
//! optional [`ResponsePolicy`]; the chain builder sorts them into the two
//! ordered lists once, at load time.
//!
//! ```text
//!              ┌──────────────── PolicyImpl ────────────────┐
//!  name/version│ mode: {request_body, response_body}        │
//!              │ request:  Option<Arc<dyn RequestPolicy>>   │
//!              │ response: Option<Arc<dyn ResponsePolicy>>  │
//!              └────────────────────────────────────────────┘
//! ```

use crate::action::PolicyAction;
use crate::context::{RequestContext, ResponseContext};
use crate::error::PolicyError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Body requirement
// ─────────────────────────────────────────────────────────────────────────────

/// What a policy needs from the message body in one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyRequirement {
    /// Headers only.
    #[default]
    None,
    /// The full body, delivered in one piece.
    Buffer,
    /// Reserved for chunk-by-chunk processing; treated like `Buffer`.
    Stream,
}

impl BodyRequirement {
    pub fn needs_body(self) -> bool {
        !matches!(self, BodyRequirement::None)
    }
}

/// Declared body requirements of a policy, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMode {
    pub request_body: BodyRequirement,
    pub response_body: BodyRequirement,
}

impl PolicyMode {
    /// Headers only in both directions.
    pub const HEADERS_ONLY: PolicyMode = PolicyMode {
        request_body: BodyRequirement::None,
        response_body: BodyRequirement::None,
    };

    pub fn new(request_body: BodyRequirement, response_body: BodyRequirement) -> Self {
        Self {
            request_body,
            response_body,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque parameter bag of one policy instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyParams(serde_json::Map<String, serde_json::Value>);

impl PolicyParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a typed parameter.  Absent keys yield `Ok(None)`; a present but
    /// ill-typed value is an error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PolicyError> {
        match self.0.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| PolicyError::InvalidParameters(format!("'{key}': {e}"))),
        }
    }

    /// Deserialize the whole bag into a typed parameter struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, PolicyError> {
        serde_json::from_value(serde_json::Value::Object(self.0.clone()))
            .map_err(|e| PolicyError::InvalidParameters(e.to_string()))
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for PolicyParams {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase traits
// ─────────────────────────────────────────────────────────────────────────────

/// A policy that runs on the request path.
///
/// Implementations must be `Send + Sync`: one instance serves every route and
/// every stream that references it, with per-instance settings passed in as
/// [`PolicyParams`].
#[async_trait]
pub trait RequestPolicy: Send + Sync {
    async fn on_request(
        &self,
        ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError>;
}

/// A policy that runs on the response path.
#[async_trait]
pub trait ResponsePolicy: Send + Sync {
    async fn on_response(
        &self,
        ctx: &mut ResponseContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError>;
}

/// Load-time parameter check, run once per route before a chain is built.
pub type ParamsValidator = Arc<dyn Fn(&PolicyParams) -> Result<(), PolicyError> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// PolicyImpl
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved policy implementation as handed out by a [`PolicyRegistry`].
#[derive(Clone)]
pub struct PolicyImpl {
    name: String,
    version: String,
    mode: PolicyMode,
    request: Option<Arc<dyn RequestPolicy>>,
    response: Option<Arc<dyn ResponsePolicy>>,
    validator: Option<ParamsValidator>,
}

impl PolicyImpl {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            mode: PolicyMode::HEADERS_ONLY,
            request: None,
            response: None,
            validator: None,
        }
    }

    pub fn with_mode(mut self, mode: PolicyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_request(mut self, policy: Arc<dyn RequestPolicy>) -> Self {
        self.request = Some(policy);
        self
    }

    pub fn with_response(mut self, policy: Arc<dyn ResponsePolicy>) -> Self {
        self.response = Some(policy);
        self
    }

    pub fn with_validator(mut self, validator: ParamsValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Declared body requirements.
    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn request(&self) -> Option<&Arc<dyn RequestPolicy>> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&Arc<dyn ResponsePolicy>> {
        self.response.as_ref()
    }

    pub fn validate_params(&self, params: &PolicyParams) -> Result<(), PolicyError> {
        match &self.validator {
            Some(validate) => validate(params),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PolicyImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyImpl")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("mode", &self.mode)
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PolicyRegistry trait
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves `(name, version)` to a policy implementation.
pub trait PolicyRegistry: Send + Sync {
    /// Returns `None` when nothing is registered under that name + version.
    fn get_implementation(&self, name: &str, version: &str) -> Option<PolicyImpl>;

    /// All registered `(name, version)` pairs.
    fn list(&self) -> Vec<(String, String)>;
}
