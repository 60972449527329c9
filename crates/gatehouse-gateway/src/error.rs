//! Gateway error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatehouse_kernel::ConfigError;
use serde_json::json;
use thiserror::Error;

/// Runtime-level errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("policy '{name}' version '{version}' is already registered")]
    DuplicatePolicy { name: String, version: String },

    #[error("no route file configured")]
    NoRouteFile,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::Config(_) => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
            GatewayError::NoRouteFile => (StatusCode::CONFLICT, "NO_ROUTE_FILE"),
            GatewayError::DuplicatePolicy { .. } => (StatusCode::CONFLICT, "DUPLICATE_POLICY"),
            GatewayError::Settings(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_SETTINGS"),
            GatewayError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            GatewayError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSPORT_ERROR"),
            GatewayError::Watch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WATCH_ERROR"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_maps_to_bad_request() {
        let err: GatewayError = ConfigError::DuplicateRoute("orders".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_maps_to_500() {
        let resp = GatewayError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
