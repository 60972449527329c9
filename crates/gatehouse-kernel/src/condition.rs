//! Execution-condition expressions.
//!
//! A policy instance may carry a condition; the executor skips the policy
//! when it evaluates to false.  Conditions are [Rhai] expressions compiled
//! once at load time, so a malformed expression fails the reload instead of
//! the request.
//!
//! ```text
//! request.method == "POST"
//! (request.method == "POST" || request.method == "PUT") && has(request.headers["x-debug"])
//! !request.path.startsWith("/health") && response.status != 200
//! ```
//!
//! Two constants are in scope:
//!
//! | Name | Fields |
//! |------|--------|
//! | `request` | `method`, `path`, `authority`, `headers` (lower-cased names) |
//! | `response` | `status`, `headers`; empty during the request phase |
//!
//! Missing fields and headers read as `()`: `has(x)` is false for them,
//! `==` against them is false and `!=` is true.  An expression that fails
//! at run time, or does not produce a `bool`, counts as false.
//!
//! [Rhai]: https://rhai.rs

use crate::context::{RequestContext, RequestView, ResponseContext};
use crate::headers::Headers;
use rhai::{AST, Dynamic, Engine, INT, Map, Scope};
use std::fmt;
use std::sync::{Arc, LazyLock};

const REQUEST: &str = "request";
const RESPONSE: &str = "response";

static ENGINE: LazyLock<Engine> = LazyLock::new(|| {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine.set_max_operations(10_000);
    engine.set_max_expr_depths(32, 32);
    engine.set_max_string_size(64 * 1024);
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});

    engine.register_fn("has", |value: Dynamic| !value.is_unit());
    engine.register_fn("startsWith", |s: &str, prefix: &str| s.starts_with(prefix));
    engine.register_fn("endsWith", |s: &str, suffix: &str| s.ends_with(suffix));
    engine
});

/// A compiled condition.
#[derive(Clone)]
pub struct Condition {
    source: String,
    ast: Arc<AST>,
}

/// Where a condition reads `request` and `response` from.
pub trait ConditionScope {
    fn request_map(&self) -> Map;
    /// Empty when there is no response yet.
    fn response_map(&self) -> Map;
}

fn headers_map(headers: &Headers) -> Map {
    let mut map = Map::new();
    for (name, value) in headers.iter() {
        map.entry(name.to_ascii_lowercase().into())
            .or_insert_with(|| Dynamic::from(value.to_string()));
    }
    map
}

fn request_fields(
    method: &str,
    path: &str,
    authority: Option<&str>,
    headers: &Headers,
) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), method.to_string().into());
    map.insert("path".into(), path.to_string().into());
    if let Some(authority) = authority {
        map.insert("authority".into(), authority.to_string().into());
    }
    map.insert("headers".into(), headers_map(headers).into());
    map
}

impl ConditionScope for RequestContext {
    fn request_map(&self) -> Map {
        request_fields(
            &self.method,
            &self.path,
            self.authority.as_deref(),
            &self.headers,
        )
    }

    fn response_map(&self) -> Map {
        Map::new()
    }
}

impl ConditionScope for RequestView {
    fn request_map(&self) -> Map {
        request_fields(
            &self.method,
            &self.path,
            self.authority.as_deref(),
            &self.headers,
        )
    }

    fn response_map(&self) -> Map {
        Map::new()
    }
}

impl ConditionScope for ResponseContext {
    fn request_map(&self) -> Map {
        self.request.request_map()
    }

    fn response_map(&self) -> Map {
        let mut map = Map::new();
        map.insert("status".into(), Dynamic::from(INT::from(self.status)));
        map.insert("headers".into(), headers_map(&self.headers).into());
        map
    }
}

impl Condition {
    /// Compile an expression.  The error string is the compiler's message.
    pub fn parse(source: &str) -> Result<Self, String> {
        let source = source.trim();
        if source.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut names = Scope::new();
        names.push_constant(REQUEST, Map::new());
        names.push_constant(RESPONSE, Map::new());
        let ast = ENGINE
            .compile_expression_with_scope(&names, source)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            source: source.to_string(),
            ast: Arc::new(ast),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &dyn ConditionScope) -> bool {
        let mut scope = Scope::new();
        scope.push_constant(REQUEST, ctx.request_map());
        scope.push_constant(RESPONSE, ctx.response_map());
        match ENGINE.eval_ast_with_scope::<bool>(&mut scope, &self.ast) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(condition = %self.source, error = %e, "condition did not evaluate to true");
                false
            }
        }
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Condition {}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.source).finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
