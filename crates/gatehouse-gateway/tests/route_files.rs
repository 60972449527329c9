//! Route files on disk through the loader and the registry.

use gatehouse_gateway::{ConfigLoader, InMemoryPolicyRegistry, ReloadMode, RouteRegistry};
use gatehouse_kernel::{BodyMode, ConfigError, PolicyRegistry, request_body_mode};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn loader(mode: ReloadMode) -> (Arc<RouteRegistry>, ConfigLoader) {
    let routes = Arc::new(RouteRegistry::new());
    let policies: Arc<dyn PolicyRegistry> = Arc::new(InMemoryPolicyRegistry::with_builtins());
    let loader = ConfigLoader::new(Arc::clone(&routes), policies).with_mode(mode);
    (routes, loader)
}

#[test]
fn json_file_with_env_substitution() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("GATEHOUSE_IT_ORDERS_KEY", "s3cret") };
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.json");
    fs::write(
        &path,
        r#"{ "routes": [ { "routeKey": "orders", "policies": [
            { "name": "api-key-auth", "version": "v1.0.0",
              "parameters": { "keys": ["${GATEHOUSE_IT_ORDERS_KEY}"] } } ] } ] }"#,
    )
    .unwrap();

    let (routes, loader) = loader(ReloadMode::Replace);
    let summary = loader.load_file(&path).unwrap();
    assert_eq!(summary.routes_loaded, 1);
    let chain = routes.lookup("orders").unwrap();
    assert_eq!(chain.request_policies().len(), 1);
    assert_eq!(request_body_mode(&chain), BodyMode::Skip);
}

#[test]
fn replace_then_merge_on_disk() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.yaml");
    let second = dir.path().join("second.yml");
    fs::write(
        &first,
        "routes:\n  - route_key: a\n    policies: []\n  - route_key: b\n    policies: []\n",
    )
    .unwrap();
    fs::write(
        &second,
        "routes:\n  - route_key: c\n    policies:\n      - { name: access-log, version: v1.0.0 }\n",
    )
    .unwrap();

    let (routes, replace) = loader(ReloadMode::Replace);
    replace.load_file(&first).unwrap();
    replace.load_file(&second).unwrap();
    assert_eq!(routes.route_keys(), vec!["c".to_string()]);

    let (routes, merge) = loader(ReloadMode::Merge);
    merge.load_file(&first).unwrap();
    let summary = merge.load_file(&second).unwrap();
    assert_eq!(summary.routes_active, 3);
    assert_eq!(routes.route_keys(), vec!["a", "b", "c"]);
}

#[test]
fn bad_file_keeps_previous_routes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.yaml");
    fs::write(
        &path,
        "routes:\n  - route_key: stable\n    policies:\n      - { name: respond, version: v1.0.0 }\n",
    )
    .unwrap();
    let (routes, loader) = loader(ReloadMode::Replace);
    loader.load_file(&path).unwrap();
    let before = routes.lookup("stable").unwrap();

    fs::write(
        &path,
        "routes:\n  - route_key: stable\n    policies:\n      - { name: respond, version: v1.0.0, parameters: { status: 42 } }\n",
    )
    .unwrap();
    let err = loader.load_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidParameters { ref policy, .. } if policy == "respond"));
    assert!(Arc::ptr_eq(&before, &routes.lookup("stable").unwrap()));

    let missing = dir.path().join("absent.yaml");
    assert!(matches!(loader.load_file(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(&path, "routes = []").unwrap();
    let (_, loader) = loader(ReloadMode::Replace);
    assert!(matches!(
        loader.load_file(&path),
        Err(ConfigError::UnsupportedFormat(_))
    ));
}
