//! Built-in policies.
//!
//! Each module exposes an `implementation()` constructor returning the
//! [`PolicyImpl`] registered under [`BUILTIN_VERSION`].
//!
//! | Name | Phases | Body |
//! |------|--------|------|
//! | `modify-headers` | request, response | none |
//! | `api-key-auth` | request | none |
//! | `rate-limit` | request, response | none |
//! | `access-log` | request, response | none |
//! | `respond` | request | none |
//! | `replace-body` | request, response | buffer |

pub mod access_log;
pub mod api_key_auth;
pub mod modify_headers;
pub mod rate_limit;
pub mod replace_body;
pub mod respond;

use gatehouse_kernel::{ParamsValidator, PolicyImpl, PolicyParams};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const BUILTIN_VERSION: &str = "v1.0.0";

/// Metadata key under which `api-key-auth` records the caller.
pub const PRINCIPAL_KEY: &str = "auth.principal";

/// Every built-in policy.
pub fn builtins() -> Vec<PolicyImpl> {
    vec![
        modify_headers::implementation(),
        api_key_auth::implementation(),
        rate_limit::implementation(),
        access_log::implementation(),
        respond::implementation(),
        replace_body::implementation(),
    ]
}

/// Validator that only checks the parameters deserialize into `T`.
pub(crate) fn parses_as<T: DeserializeOwned + 'static>() -> ParamsValidator {
    Arc::new(|params: &PolicyParams| params.parse::<T>().map(|_| ()))
}
