//! Process settings.
//!
//! Loaded with the `config` crate from an optional settings file (TOML,
//! JSON or YAML by extension, `${VAR}` substituted) layered with
//! `GATEHOUSE__<FIELD>` environment variables, e.g.
//! `GATEHOUSE__GRPC_ADDR=127.0.0.1:9001`.

use crate::error::{GatewayError, GatewayResult};
use crate::loader::ReloadMode;
use crate::service::{DEFAULT_ROUTE_KEY, DEFAULT_ROUTE_NAMESPACE};
use config::{Config, Environment, File, FileFormat};
use gatehouse_kernel::config::substitute_env_vars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "GATEHOUSE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Listen address of the external-processing gRPC server.
    pub grpc_addr: String,
    /// Listen address of the admin HTTP server; empty disables it.
    pub admin_addr: String,
    /// Declarative route file.  Without one the gateway starts with no
    /// routes and bypasses every stream.
    pub routes_file: Option<PathBuf>,
    pub watch_routes_file: bool,
    /// Filter-metadata namespace holding the route key.
    pub route_metadata_namespace: String,
    pub route_metadata_key: String,
    /// Per-policy deadline; `0` disables it.
    pub policy_timeout_ms: u64,
    pub reload_mode: ReloadMode,
    pub log_format: LogFormat,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            grpc_addr: "0.0.0.0:9001".to_string(),
            admin_addr: "0.0.0.0:9002".to_string(),
            routes_file: None,
            watch_routes_file: true,
            route_metadata_namespace: DEFAULT_ROUTE_NAMESPACE.to_string(),
            route_metadata_key: DEFAULT_ROUTE_KEY.to_string(),
            policy_timeout_ms: 0,
            reload_mode: ReloadMode::Replace,
            log_format: LogFormat::Text,
        }
    }
}

fn file_format(path: &Path) -> GatewayResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        other => Err(GatewayError::Settings(config::ConfigError::Message(format!(
            "unsupported settings format '{other}'"
        )))),
    }
}

impl GatewaySettings {
    /// Load from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        Self::load_from(path, None)
    }

    /// Like [`load`](Self::load) with an explicit environment map instead of
    /// the process environment.
    pub fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> GatewayResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            let format = file_format(path)?;
            let content = std::fs::read_to_string(path)?;
            builder = builder.add_source(File::from_str(&substitute_env_vars(&content), format));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn grpc_socket_addr(&self) -> GatewayResult<SocketAddr> {
        parse_addr("grpc_addr", &self.grpc_addr)
    }

    /// `None` when the admin server is disabled.
    pub fn admin_socket_addr(&self) -> GatewayResult<Option<SocketAddr>> {
        if self.admin_addr.trim().is_empty() {
            return Ok(None);
        }
        parse_addr("admin_addr", &self.admin_addr).map(Some)
    }
}

fn parse_addr(field: &str, value: &str) -> GatewayResult<SocketAddr> {
    value.trim().parse().map_err(|e| {
        GatewayError::Settings(config::ConfigError::Message(format!(
            "{field} '{value}': {e}"
        )))
    })
}
