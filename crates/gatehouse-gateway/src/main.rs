//! Gatehouse external processor — entry point.
//!
//! ```text
//! gatehouse [SETTINGS_FILE]
//! ```
//!
//! The settings file may also be given with `GATEHOUSE_CONFIG`.  Every
//! setting can be overridden with a `GATEHOUSE__<FIELD>` variable.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEHOUSE__GRPC_ADDR` | `0.0.0.0:9001` | External-processor listen address. |
//! | `GATEHOUSE__ADMIN_ADDR` | `0.0.0.0:9002` | Admin HTTP listen address; empty disables it. |
//! | `GATEHOUSE__ROUTES_FILE` | *(none)* | Route file (YAML or JSON). |
//! | `GATEHOUSE__WATCH_ROUTES_FILE` | `true` | Reload the route file on change. |
//! | `GATEHOUSE__POLICY_TIMEOUT_MS` | `0` | Per-policy deadline; `0` disables it. |
//! | `GATEHOUSE__RELOAD_MODE` | `replace` | `replace` or `merge`. |
//! | `GATEHOUSE__LOG_FORMAT` | `text` | `text` or `json`. |
//! | `RUST_LOG` | `gatehouse=info` | Log filter. |

use gatehouse_gateway::{GatehouseServer, GatewaySettings, LogFormat};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let settings_path: Option<PathBuf> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEHOUSE_CONFIG").ok())
        .map(PathBuf::from);

    let settings = match GatewaySettings::load(settings_path.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gatehouse=info"));
    match settings.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!(
        grpc_addr = %settings.grpc_addr,
        admin_addr = %settings.admin_addr,
        routes_file = ?settings.routes_file,
        reload_mode = ?settings.reload_mode,
        "Gatehouse configuration loaded"
    );

    if let Err(e) = GatehouseServer::new(settings).run().await {
        eprintln!("Gatehouse error: {e}");
        std::process::exit(1);
    }
}
