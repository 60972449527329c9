//! Per-phase views handed to policies.
//!
//! [`RequestContext`] is built when request headers arrive and optionally
//! gains a body.  When response headers arrive it is frozen into a
//! [`RequestView`] inside the [`ResponseContext`], and its [`Metadata`] moves
//! along with it.

use crate::action::Mutations;
use crate::headers::Headers;
use crate::metadata::Metadata;

/// A buffered message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub bytes: Vec<u8>,
    pub end_of_stream: bool,
}

impl Body {
    pub fn new(bytes: impl Into<Vec<u8>>, end_of_stream: bool) -> Self {
        Self {
            bytes: bytes.into(),
            end_of_stream,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Request-path context for one exchange.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id assigned by the kernel for this exchange.
    pub request_id: String,
    /// Route key the policy chain was resolved from.
    pub route_key: String,
    /// Regular headers (pseudo-headers are split out below).
    pub headers: Headers,
    /// `:path`
    pub path: String,
    /// `:method`
    pub method: String,
    /// `:authority`, when the proxy sent one.
    pub authority: Option<String>,
    /// Filled only when the chain required the request body.
    pub body: Option<Body>,
    pub metadata: Metadata,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, route_key: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            route_key: route_key.into(),
            headers: Headers::new(),
            path: String::new(),
            method: String::new(),
            authority: None,
            body: None,
            metadata: Metadata::new(),
        }
    }

    /// Build from raw header pairs as received, extracting `:path`,
    /// `:method` and `:authority`.  Other pseudo-headers are dropped.
    pub fn from_raw_headers<'a>(
        request_id: impl Into<String>,
        route_key: impl Into<String>,
        raw: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut ctx = Self::new(request_id, route_key);
        for (name, value) in raw {
            match name {
                ":path" => ctx.path = value.to_string(),
                ":method" => ctx.method = value.to_string(),
                ":authority" => ctx.authority = Some(value.to_string()),
                n if n.starts_with(':') => {}
                _ => ctx.headers.append(name, value),
            }
        }
        ctx
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Apply a mutation bag so later policies observe it.
    pub fn apply(&mut self, mutations: &Mutations) {
        apply_headers(&mut self.headers, mutations);
        if let Some(body) = &mutations.body {
            let end_of_stream = self.body.as_ref().is_none_or(|b| b.end_of_stream);
            self.body = Some(Body::new(body.clone(), end_of_stream));
        }
        if let Some(path) = &mutations.path {
            self.path = path.clone();
        }
        if let Some(method) = &mutations.method {
            self.method = method.clone();
        }
    }

    /// Freeze the request side for correlation on the response path.
    pub fn into_view(self) -> (RequestView, Metadata) {
        (
            RequestView {
                headers: self.headers,
                path: self.path,
                method: self.method,
                authority: self.authority,
                body: self.body,
            },
            self.metadata,
        )
    }
}

/// Read-only snapshot of the completed request.
#[derive(Debug, Clone, Default)]
pub struct RequestView {
    pub headers: Headers,
    pub path: String,
    pub method: String,
    pub authority: Option<String>,
    pub body: Option<Body>,
}

/// Response-path context for one exchange.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub request_id: String,
    pub route_key: String,
    /// The request this response answers.
    pub request: RequestView,
    pub headers: Headers,
    /// `:status`; `0` if the proxy did not send one.
    pub status: u16,
    /// Filled only when the chain required the response body.
    pub body: Option<Body>,
    /// Carried over from the request phase.
    pub metadata: Metadata,
}

impl ResponseContext {
    /// Build from the completed request and raw response header pairs.
    pub fn from_request<'a>(
        request: RequestContext,
        raw: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let request_id = request.request_id.clone();
        let route_key = request.route_key.clone();
        let (view, metadata) = request.into_view();
        let mut ctx = Self {
            request_id,
            route_key,
            request: view,
            headers: Headers::new(),
            status: 0,
            body: None,
            metadata,
        };
        for (name, value) in raw {
            match name {
                ":status" => ctx.status = value.parse().unwrap_or(0),
                n if n.starts_with(':') => {}
                _ => ctx.headers.append(name, value),
            }
        }
        ctx
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn apply(&mut self, mutations: &Mutations) {
        apply_headers(&mut self.headers, mutations);
        if let Some(body) = &mutations.body {
            let end_of_stream = self.body.as_ref().is_none_or(|b| b.end_of_stream);
            self.body = Some(Body::new(body.clone(), end_of_stream));
        }
        if let Some(status) = mutations.status {
            self.status = status;
        }
    }
}

fn apply_headers(headers: &mut Headers, mutations: &Mutations) {
    for (name, value) in &mutations.headers.set {
        headers.set(name.as_str(), value.as_str());
    }
    for (name, value) in &mutations.headers.append {
        headers.append(name.as_str(), value.as_str());
    }
    for name in &mutations.headers.remove {
        headers.remove(name);
    }
}
