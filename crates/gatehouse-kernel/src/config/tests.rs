//! Route file parsing and validation tests.

use super::*;
use crate::action::PolicyAction;
use crate::context::RequestContext;
use crate::error::PolicyError;
use crate::policy::{PolicyImpl, PolicyParams, PolicyRegistry, RequestPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

struct Pass;

#[async_trait]
impl RequestPolicy for Pass {
    async fn on_request(
        &self,
        _ctx: &mut RequestContext,
        _params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        Ok(PolicyAction::Continue)
    }
}

struct TestRegistry(HashMap<(String, String), PolicyImpl>);

impl TestRegistry {
    fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            ("pass".to_string(), "v1".to_string()),
            PolicyImpl::new("pass", "v1").with_request(Arc::new(Pass)),
        );
        map.insert(
            ("strict".to_string(), "v1".to_string()),
            PolicyImpl::new("strict", "v1")
                .with_request(Arc::new(Pass))
                .with_validator(Arc::new(|p: &PolicyParams| {
                    p.get::<String>("required")?
                        .map(|_| ())
                        .ok_or_else(|| PolicyError::InvalidParameters("'required' is missing".into()))
                })),
        );
        Self(map)
    }
}

impl PolicyRegistry for TestRegistry {
    fn get_implementation(&self, name: &str, version: &str) -> Option<PolicyImpl> {
        self.0.get(&(name.to_string(), version.to_string())).cloned()
    }

    fn list(&self) -> Vec<(String, String)> {
        self.0.keys().cloned().collect()
    }
}

#[test]
fn test_detect_format() {
    assert_eq!(detect_format(Path::new("routes.yaml")).unwrap(), RouteFileFormat::Yaml);
    assert_eq!(detect_format(Path::new("routes.yml")).unwrap(), RouteFileFormat::Yaml);
    assert_eq!(detect_format(Path::new("routes.JSON")).unwrap(), RouteFileFormat::Json);
    assert!(detect_format(Path::new("routes.toml")).is_err());
    assert!(detect_format(Path::new("routes")).is_err());
}

#[test]
fn test_env_substitution() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("GATEHOUSE_TEST_KEY_7431", "secret") };
    let out = substitute_env_vars("a: ${GATEHOUSE_TEST_KEY_7431} b: $GATEHOUSE_TEST_KEY_7431");
    assert_eq!(out, "a: secret b: secret");
    let untouched = substitute_env_vars("x: ${GATEHOUSE_UNSET_VAR_99}");
    assert_eq!(untouched, "x: ${GATEHOUSE_UNSET_VAR_99}");
}

#[test]
fn test_from_str_yaml() {
    let yaml = r#"
routes:
  - route_key: orders
    policies:
      - name: pass
        version: v1
        execution_condition: 'request.method == "POST"'
        parameters:
          keys: ["a"]
      - name: pass
        version: v1
        enabled: false
"#;
    let file = from_str(yaml, RouteFileFormat::Yaml).unwrap();
    assert_eq!(file.routes.len(), 1);
    let route = &file.routes[0];
    assert_eq!(route.route_key, "orders");
    assert_eq!(route.policies.len(), 2);
    assert!(route.policies[0].enabled);
    assert!(!route.policies[1].enabled);
    assert_eq!(
        route.policies[0].execution_condition.as_deref(),
        Some(r#"request.method == "POST""#)
    );
}

#[test]
fn test_from_str_json_accepts_camel_case() {
    let json = r#"{
  "routes": [
    { "routeKey": "users",
      "policies": [ { "name": "pass", "version": "v1", "executionCondition": "has(request.headers[\"x\"])" } ] }
  ]
}"#;
    let file = from_str(json, RouteFileFormat::Json).unwrap();
    assert_eq!(file.routes[0].route_key, "users");
    assert!(file.routes[0].policies[0].execution_condition.is_some());
}

#[test]
fn test_parse_error_is_reported() {
    let err = from_str("routes: [", RouteFileFormat::Yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_load_route_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.yaml");
    fs::write(
        &path,
        "routes:\n  - route_key: a\n    policies:\n      - {name: pass, version: v1}\n",
    )
    .unwrap();
    let file = load_route_file(&path).unwrap();
    assert_eq!(file.routes[0].policies[0].name.as_deref(), Some("pass"));
}

#[test]
fn test_validate_resolves_policies() {
    let file = RouteFile::default().with_route(RouteEntry {
        route_key: "orders".into(),
        policies: vec![PolicyEntry::new("pass", "v1")],
    });
    let resolved = file.validate(&TestRegistry::new()).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].route_key, "orders");
    assert_eq!(resolved[0].policies[0].0.name, "pass");
}

#[test]
fn test_validate_rejects_unknown_policy() {
    let file = RouteFile::default()
        .with_route(RouteEntry {
            route_key: "ok".into(),
            policies: vec![PolicyEntry::new("pass", "v1")],
        })
        .with_route(RouteEntry {
            route_key: "bad".into(),
            policies: vec![PolicyEntry::new("jwt", "v2")],
        });
    let err = file.validate(&TestRegistry::new()).unwrap_err();
    assert!(
        matches!(err, ConfigError::UnknownPolicy { ref route, ref name, .. } if route == "bad" && name == "jwt")
    );
}

#[test]
fn test_validate_missing_fields() {
    let mut entry = PolicyEntry::new("pass", "v1");
    entry.name = None;
    let file = RouteFile::default().with_route(RouteEntry {
        route_key: "r".into(),
        policies: vec![entry],
    });
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::MissingPolicyName { index: 0, .. })
    ));

    let mut entry = PolicyEntry::new("pass", "v1");
    entry.version = Some("  ".into());
    let file = RouteFile::default().with_route(RouteEntry {
        route_key: "r".into(),
        policies: vec![entry],
    });
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::MissingPolicyVersion { .. })
    ));
}

#[test]
fn test_validate_route_keys() {
    let file = RouteFile::default().with_route(RouteEntry::default());
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::EmptyRouteKey { index: 0 })
    ));

    let route = RouteEntry {
        route_key: "dup".into(),
        policies: Vec::new(),
    };
    let file = RouteFile::default()
        .with_route(route.clone())
        .with_route(route);
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::DuplicateRoute(ref k)) if k == "dup"
    ));
}

#[test]
fn test_validate_params_and_condition() {
    let file = RouteFile::default().with_route(RouteEntry {
        route_key: "r".into(),
        policies: vec![PolicyEntry::new("strict", "v1")],
    });
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::InvalidParameters { .. })
    ));

    let mut entry = PolicyEntry::new("pass", "v1");
    entry.execution_condition = Some(r#"request.method === "GET""#.into());
    let file = RouteFile::default().with_route(RouteEntry {
        route_key: "r".into(),
        policies: vec![entry],
    });
    assert!(matches!(
        file.validate(&TestRegistry::new()),
        Err(ConfigError::InvalidCondition { .. })
    ));
}
