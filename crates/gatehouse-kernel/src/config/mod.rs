//! Route configuration loading.
//!
//! Reads a declarative route file, YAML or JSON, detected from the file
//! extension.  Environment variables are substituted before parsing so
//! secrets such as API keys can stay out of the file.
//!
//! ```yaml
//! routes:
//!   - route_key: orders
//!     policies:
//!       - name: api-key-auth
//!         version: v1.0.0
//!         parameters:
//!           keys: ["${ORDERS_API_KEY}"]
//! ```

mod schema;

pub use schema::{PolicyEntry, ResolvedRoute, RouteEntry, RouteFile};

use crate::error::{ConfigError, ConfigResult};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::LazyLock;

/// Supported route file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFileFormat {
    Yaml,
    Json,
}

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
});

static SIMPLE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid regex"));

/// Detect the route file format from its extension.
///
/// `.yaml` / `.yml` map to YAML and `.json` to JSON.
pub fn detect_format(path: &Path) -> ConfigResult<RouteFileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("no file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(RouteFileFormat::Yaml),
        "json" => Ok(RouteFileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string.
///
/// Both `${VAR}` and `$VAR` are replaced; references to unset variables
/// are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });
    SIMPLE_VAR
        .replace_all(&braced, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Parse a route file from a string.
pub fn from_str(content: &str, format: RouteFileFormat) -> ConfigResult<RouteFile> {
    let substituted = substitute_env_vars(content);
    match format {
        RouteFileFormat::Yaml => {
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        RouteFileFormat::Json => {
            serde_json::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

/// Read and parse a route file.
pub fn load_route_file(path: impl AsRef<Path>) -> ConfigResult<RouteFile> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

#[cfg(test)]
mod tests;
