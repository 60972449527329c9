//! Error types for `gatehouse-kernel`.
//!
//! [`ConfigError`] covers every failure that can be detected while a route
//! file is read, parsed and validated, before any chain is built or swapped
//! into a registry.  [`PolicyError`] is what a policy returns when it fails
//! while processing a request or response.

use thiserror::Error;

/// Load / validation error for the declarative route configuration.
///
/// Any of these aborts the whole reload; the previously active configuration
/// stays in force.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    // ── Source ───────────────────────────────────────────────────────────────
    /// The route file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The route file is not valid YAML / JSON or does not match the schema.
    #[error("config parsing error: {0}")]
    Parse(String),

    /// The file extension does not map to a supported format.
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    // ── Routes ───────────────────────────────────────────────────────────────
    /// A route entry has an empty or whitespace-only `route_key`.
    #[error("route #{index} has an empty route key")]
    EmptyRouteKey { index: usize },

    /// The same route key appears more than once in one source.
    #[error("route '{0}' is defined more than once")]
    DuplicateRoute(String),

    // ── Policies ─────────────────────────────────────────────────────────────
    /// A policy entry is missing its `name`.
    #[error("route '{route}': policy #{index} is missing required field 'name'")]
    MissingPolicyName { route: String, index: usize },

    /// A policy entry is missing its `version`.
    #[error("route '{route}': policy '{policy}' is missing required field 'version'")]
    MissingPolicyVersion { route: String, policy: String },

    /// No implementation is registered for this name + version.
    #[error("route '{route}': unknown policy '{name}' version '{version}'")]
    UnknownPolicy {
        route: String,
        name: String,
        version: String,
    },

    /// The policy implementation rejected its parameters.
    #[error("route '{route}': policy '{policy}' has invalid parameters: {reason}")]
    InvalidParameters {
        route: String,
        policy: String,
        reason: String,
    },

    /// The execution condition expression does not parse.
    #[error("route '{route}': policy '{policy}' has an invalid execution condition: {reason}")]
    InvalidCondition {
        route: String,
        policy: String,
        reason: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure raised by a policy while it runs.
///
/// On the request path this terminates the exchange with a 5xx immediate
/// response; on the response path the upstream response is forwarded
/// unmodified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    /// The policy ran and failed.
    #[error("policy failed: {0}")]
    Failed(String),

    /// Parameters could not be interpreted.
    #[error("invalid policy parameters: {0}")]
    InvalidParameters(String),

    /// The policy did not finish within its deadline.
    #[error("policy '{policy}' timed out after {timeout_ms} ms")]
    Timeout { policy: String, timeout_ms: u64 },

    #[error("internal policy error: {0}")]
    Internal(String),
}
