//! Route file hot reload.
//!
//! Watches the route file's directory (editors often replace files by
//! rename, which a watch on the file itself would miss), debounces bursts of
//! events, and reloads through the [`ConfigLoader`].  A failed reload is
//! logged and the previous configuration stays in force.

use crate::error::GatewayResult;
use crate::loader::ConfigLoader;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct ConfigWatcher {
    path: PathBuf,
    loader: Arc<ConfigLoader>,
    debounce: Duration,
    reloads: Arc<AtomicU64>,
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, loader: Arc<ConfigLoader>) -> Self {
        Self {
            path: path.into(),
            loader,
            debounce: DEFAULT_DEBOUNCE,
            reloads: Arc::new(AtomicU64::new(0)),
            watcher: None,
            shutdown_tx: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Successful reloads so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Start watching.  Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> GatewayResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let (tx, mut rx) = mpsc::channel::<Event>(256);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = tx.blocking_send(event);
                }
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        self.watcher = Some(watcher);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let path = self.path.clone();
        let loader = Arc::clone(&self.loader);
        let reloads = Arc::clone(&self.reloads);
        let debounce = self.debounce;
        info!(path = %path.display(), "watching route file");

        tokio::spawn(async move {
            let touches_file = |event: &Event| {
                matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
            };

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { return };
                        if !touches_file(&event) {
                            continue;
                        }
                        // Wait for the burst to settle.
                        loop {
                            match tokio::time::timeout(debounce, rx.recv()).await {
                                Ok(Some(_)) => continue,
                                Ok(None) => return,
                                Err(_) => break,
                            }
                        }
                        debug!(path = %path.display(), "route file changed");
                        let blocking_loader = Arc::clone(&loader);
                        let blocking_path = path.clone();
                        let outcome = tokio::task::spawn_blocking(move || {
                            blocking_loader.load_file(&blocking_path)
                        })
                        .await;
                        let result = match outcome {
                            Ok(result) => result,
                            Err(e) => {
                                error!(error = %e, "route file reload task failed");
                                continue;
                            }
                        };
                        match result {
                            Ok(summary) => {
                                reloads.fetch_add(1, Ordering::Relaxed);
                                info!(
                                    routes_active = summary.routes_active,
                                    "route file reloaded"
                                );
                            }
                            Err(e) => {
                                error!(
                                    path = %path.display(),
                                    error = %e,
                                    "route file reload failed, keeping previous configuration"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("route file watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.watcher = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryPolicyRegistry, RouteRegistry};
    use tempfile::TempDir;

    fn route_file(route: &str) -> String {
        format!(
            "routes:\n  - route_key: {route}\n    policies:\n      - {{ name: access-log, version: v1.0.0 }}\n"
        )
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reloads_on_change_and_keeps_old_config_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.yaml");
        std::fs::write(&path, route_file("first")).unwrap();

        let routes = Arc::new(RouteRegistry::new());
        let loader = Arc::new(ConfigLoader::new(
            Arc::clone(&routes),
            Arc::new(InMemoryPolicyRegistry::with_builtins()),
        ));
        loader.load_file(&path).unwrap();

        let mut watcher =
            ConfigWatcher::new(&path, Arc::clone(&loader)).with_debounce(Duration::from_millis(50));
        watcher.start().unwrap();

        std::fs::write(&path, route_file("second")).unwrap();
        assert!(wait_for(|| routes.lookup("second").is_some()).await);
        assert!(routes.lookup("first").is_none());

        std::fs::write(&path, "routes: [").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(routes.lookup("second").is_some());

        watcher.stop().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reload_runs_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routes.yaml");
        std::fs::write(&path, route_file("first")).unwrap();

        let routes = Arc::new(RouteRegistry::new());
        let loader = Arc::new(ConfigLoader::new(
            Arc::clone(&routes),
            Arc::new(InMemoryPolicyRegistry::with_builtins()),
        ));

        let mut watcher =
            ConfigWatcher::new(&path, Arc::clone(&loader)).with_debounce(Duration::from_millis(20));
        watcher.start().unwrap();

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        for n in 0..5 {
            std::fs::write(&path, route_file(&format!("r{n}"))).unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert!(wait_for(|| routes.lookup("r4").is_some()).await);
        assert!(watcher.reload_count() >= 1);
        assert!(ticks.load(Ordering::Relaxed) > 10);

        ticker.abort();
        watcher.stop().await;
    }
}
