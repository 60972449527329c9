//! In-memory token-bucket rate limiting.
//!
//! Buckets are keyed by route and caller.  The caller is, in order:
//!
//! 1. the authenticated principal from request metadata, when `api-key-auth`
//!    ran earlier in the chain;
//! 2. the value of `client_header`, when configured (a header the proxy
//!    sets and overwrites, such as `x-envoy-external-address`);
//! 3. the last `x-forwarded-for` hop, the one appended by the proxy;
//! 4. `anonymous`.
//!
//! The bucket is refilled continuously: on each request the elapsed
//! wall-clock time is converted to tokens and added, then one token is
//! consumed.  The bucket map is capped; when a new caller would exceed the
//! cap, buckets that have refilled to full are dropped first (they are
//! indistinguishable from a fresh bucket), then the longest-idle ones.

use super::{BUILTIN_VERSION, PRINCIPAL_KEY};
use async_trait::async_trait;
use gatehouse_kernel::{
    ImmediateResponse, Mutations, PolicyAction, PolicyError, PolicyImpl, PolicyParams,
    RequestContext, RequestPolicy, ResponseContext, ResponsePolicy,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default upper bound on tracked callers across all routes.
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;

const FORWARDED_FOR: &str = "x-forwarded-for";

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    rate_per_second: f64,
    burst_capacity: f64,
}

impl Bucket {
    fn new(rate_per_second: f64, burst_capacity: f64) -> Self {
        Self {
            tokens: burst_capacity,
            last_refill: Instant::now(),
            rate_per_second,
            burst_capacity,
        }
    }

    /// Attempt to consume one token, refilling based on elapsed time first.
    fn try_consume(&mut self, rate_per_second: f64, burst_capacity: f64) -> bool {
        let now = Instant::now();
        self.rate_per_second = rate_per_second;
        self.burst_capacity = burst_capacity;
        self.tokens = self.tokens_at(now);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.rate_per_second).min(self.burst_capacity)
    }

    fn is_full_at(&self, now: Instant) -> bool {
        self.tokens_at(now) >= self.burst_capacity
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitParams {
    requests_per_second: f64,
    burst: u32,
    #[serde(default)]
    client_header: Option<String>,
}

impl RateLimitParams {
    /// Whole seconds until one token is available again, at least 1.
    fn retry_after_secs(&self) -> u64 {
        (1.0 / self.requests_per_second).ceil().max(1.0) as u64
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub struct RateLimit {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_buckets: usize,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimit {
    pub fn new() -> Self {
        Self::with_max_buckets(DEFAULT_MAX_BUCKETS)
    }

    pub fn with_max_buckets(max_buckets: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_buckets: max_buckets.max(1),
        }
    }

    /// Callers currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }

    fn caller_id(ctx: &RequestContext, client_header: Option<&str>) -> String {
        ctx.metadata
            .get::<String>(PRINCIPAL_KEY)
            .or_else(|| {
                client_header
                    .and_then(|name| ctx.headers.get(name))
                    .and_then(non_empty)
            })
            .or_else(|| {
                ctx.headers
                    .get_all(FORWARDED_FOR)
                    .last()
                    .and_then(|v| v.rsplit(',').next())
                    .and_then(non_empty)
            })
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn admit(&self, key: String, rate_per_second: f64, burst_capacity: f64) -> bool {
        let mut buckets = self.buckets.lock();
        if !buckets.contains_key(&key) && buckets.len() >= self.max_buckets {
            let now = Instant::now();
            let before = buckets.len();
            buckets.retain(|_, b| !b.is_full_at(now));
            while buckets.len() >= self.max_buckets {
                let Some(oldest) = buckets
                    .iter()
                    .min_by_key(|(_, b)| b.last_refill)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                buckets.remove(&oldest);
            }
            debug!(evicted = before - buckets.len(), "rate-limit buckets evicted");
        }
        buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(rate_per_second, burst_capacity))
            .try_consume(rate_per_second, burst_capacity)
    }
}

#[async_trait]
impl RequestPolicy for RateLimit {
    async fn on_request(
        &self,
        ctx: &mut RequestContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: RateLimitParams = params.parse()?;
        let caller = Self::caller_id(ctx, params.client_header.as_deref());
        let bucket_key = format!("{}|{}", ctx.route_key, caller);
        let allowed = self.admit(
            bucket_key,
            params.requests_per_second,
            f64::from(params.burst),
        );

        if allowed {
            return Ok(PolicyAction::Continue);
        }

        warn!(
            request_id = %ctx.request_id,
            route_key = %ctx.route_key,
            caller = %caller,
            "rate limit exceeded"
        );
        let retry_after = params.retry_after_secs();
        Ok(PolicyAction::ImmediateResponse(
            ImmediateResponse::json_error(
                429,
                "RATE_LIMIT_EXCEEDED",
                &format!("Rate limit exceeded. Retry after {retry_after} second(s)."),
            )
            .with_header("retry-after", retry_after.to_string())
            .with_header("x-ratelimit-limit", params.burst.to_string()),
        ))
    }
}

#[async_trait]
impl ResponsePolicy for RateLimit {
    async fn on_response(
        &self,
        _ctx: &mut ResponseContext,
        params: &PolicyParams,
    ) -> Result<PolicyAction, PolicyError> {
        let params: RateLimitParams = params.parse()?;
        Ok(PolicyAction::Mutate(
            Mutations::new().set_header("x-ratelimit-limit", params.burst.to_string()),
        ))
    }
}

fn validate(params: &PolicyParams) -> Result<(), PolicyError> {
    let parsed: RateLimitParams = params.parse()?;
    if !(parsed.requests_per_second.is_finite() && parsed.requests_per_second > 0.0) {
        return Err(PolicyError::InvalidParameters(
            "'requests_per_second' must be a positive number".into(),
        ));
    }
    if parsed.burst == 0 {
        return Err(PolicyError::InvalidParameters(
            "'burst' must be at least 1".into(),
        ));
    }
    Ok(())
}

pub fn implementation() -> PolicyImpl {
    let policy = Arc::new(RateLimit::new());
    PolicyImpl::new("rate-limit", BUILTIN_VERSION)
        .with_request(policy.clone())
        .with_response(policy)
        .with_validator(Arc::new(validate))
}
