//! Composition root.
//!
//! [`GatehouseServer`] wires the policy registry, route registry, loader,
//! executor and the two listeners together:
//!
//! | Listener | Default | Serves |
//! |----------|---------|--------|
//! | gRPC  | `0.0.0.0:9001` | `ExternalProcessor` streams from the proxy |
//! | HTTP  | `0.0.0.0:9002` | admin endpoints, see [`crate::admin`] |

use crate::admin::{self, AdminState};
use crate::error::GatewayResult;
use crate::executor::SequentialChainExecutor;
use crate::loader::{ConfigLoader, LoadSummary};
use crate::proto::external_processor_server::ExternalProcessorServer;
use crate::registry::{InMemoryPolicyRegistry, RouteRegistry};
use crate::service::{ExtProcService, RouteKeyLocator};
use crate::settings::GatewaySettings;
use crate::watcher::ConfigWatcher;
use axum::Router;
use gatehouse_kernel::{ChainExecutor, PolicyRegistry};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct GatehouseServer {
    settings: GatewaySettings,
    routes: Arc<RouteRegistry>,
    policies: Arc<dyn PolicyRegistry>,
    loader: Arc<ConfigLoader>,
    executor: Arc<dyn ChainExecutor>,
}

impl GatehouseServer {
    /// Server with the built-in policies registered.
    pub fn new(settings: GatewaySettings) -> Self {
        Self::with_policies(settings, InMemoryPolicyRegistry::with_builtins())
    }

    pub fn with_policies(settings: GatewaySettings, policies: InMemoryPolicyRegistry) -> Self {
        let routes = Arc::new(RouteRegistry::new());
        let policies: Arc<dyn PolicyRegistry> = Arc::new(policies);
        let loader = Arc::new(
            ConfigLoader::new(Arc::clone(&routes), Arc::clone(&policies))
                .with_mode(settings.reload_mode),
        );
        let executor: Arc<dyn ChainExecutor> =
            Arc::new(SequentialChainExecutor::new().with_timeout_ms(settings.policy_timeout_ms));
        Self {
            settings,
            routes,
            policies,
            loader,
            executor,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    pub fn loader(&self) -> &Arc<ConfigLoader> {
        &self.loader
    }

    /// Load the configured route file, if any.
    pub fn load_routes(&self) -> GatewayResult<Option<LoadSummary>> {
        let Some(path) = &self.settings.routes_file else {
            warn!("no routes_file configured; every stream will be bypassed");
            return Ok(None);
        };
        let summary = self.loader.load_file(path)?;
        Ok(Some(summary))
    }

    pub fn ext_proc_service(&self) -> ExtProcService {
        ExtProcService::new(Arc::clone(&self.routes), Arc::clone(&self.executor)).with_locator(
            RouteKeyLocator::new(
                &self.settings.route_metadata_namespace,
                &self.settings.route_metadata_key,
            ),
        )
    }

    pub fn admin_router(&self) -> Router {
        admin::router(AdminState {
            routes: Arc::clone(&self.routes),
            policies: Arc::clone(&self.policies),
            loader: Arc::clone(&self.loader),
            routes_file: self.settings.routes_file.clone(),
        })
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> GatewayResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Serve until `shutdown` completes.  An invalid initial route file is
    /// fatal; later reload failures are not.
    pub async fn run_until<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let grpc_addr = self.settings.grpc_socket_addr()?;
        let admin_addr = self.settings.admin_socket_addr()?;

        if let Some(summary) = self.load_routes()? {
            info!(routes = summary.routes_active, "initial route configuration loaded");
        }

        let mut watcher = match (&self.settings.routes_file, self.settings.watch_routes_file) {
            (Some(path), true) => {
                let mut w = ConfigWatcher::new(path, Arc::clone(&self.loader));
                w.start()?;
                Some(w)
            }
            _ => None,
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let admin_task = match admin_addr {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!(addr = %addr, "admin server listening");
                let app = self.admin_router();
                let stop = stopped(stop_rx.clone());
                Some(tokio::spawn(async move {
                    axum::serve(listener, app).with_graceful_shutdown(stop).await
                }))
            }
            None => None,
        };

        info!(addr = %grpc_addr, "external processor listening");
        let served = tonic::transport::Server::builder()
            .add_service(ExternalProcessorServer::new(self.ext_proc_service()))
            .serve_with_shutdown(grpc_addr, stopped(stop_rx))
            .await;

        if let Some(w) = watcher.as_mut() {
            w.stop().await;
        }
        if let Some(task) = admin_task {
            match task.await {
                Ok(Err(e)) => warn!(error = %e, "admin server exited with error"),
                Err(e) => warn!(error = %e, "admin server task failed"),
                Ok(Ok(())) => {}
            }
        }
        served?;
        info!("gatehouse stopped");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn settings_with(file: Option<std::path::PathBuf>) -> GatewaySettings {
        GatewaySettings {
            grpc_addr: "127.0.0.1:0".to_string(),
            admin_addr: String::new(),
            routes_file: file,
            watch_routes_file: false,
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn load_routes_without_file() {
        let server = GatehouseServer::new(settings_with(None));
        assert!(server.load_routes().unwrap().is_none());
        assert!(server.routes().is_empty());
    }

    #[test]
    fn load_routes_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "routes:\n  - route_key: echo\n    policies:\n      - {{ name: respond, version: v1.0.0 }}"
        )
        .unwrap();
        let server = GatehouseServer::new(settings_with(Some(file.path().to_path_buf())));
        let summary = server.load_routes().unwrap().unwrap();
        assert_eq!(summary.routes_active, 1);
        assert!(server.routes().lookup("echo").is_some());
    }

    #[tokio::test]
    async fn invalid_initial_routes_are_fatal() {
        let mut file: NamedTempFile = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "routes:\n  - route_key: x\n    policies:\n      - {{ name: nope, version: v1 }}").unwrap();
        let server = GatehouseServer::new(settings_with(Some(file.path().to_path_buf())));
        let err = server.run_until(async {}).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn shuts_down_on_signal() {
        let server = GatehouseServer::new(settings_with(None));
        server.run_until(async {}).await.unwrap();
    }
}
