//! `gatehouse-kernel` — policy-execution kernel contracts.
//!
//! This crate defines the *data model and trait interfaces* of the gateway
//! policy kernel.  No transport code lives here; the gRPC external
//! processor, the route registry and the default executor live in
//! `gatehouse-gateway`.
//!
//! # Architecture mapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              gatehouse-kernel  (this crate)                 │
//! │  RequestPolicy / ResponsePolicy   PolicyImpl                │
//! │  PolicyRegistry trait             ChainExecutor trait       │
//! │  PolicyChain + PolicySpec         BodyMode resolver         │
//! │  RequestContext / ResponseContext Metadata                  │
//! │  RouteFile + validate()           Condition                 │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │  depends on
//! ┌──────────────────────────▼──────────────────────────────────┐
//! │              gatehouse-gateway  (runtime crate)             │
//! │  RouteRegistry      ConfigLoader      ConfigWatcher         │
//! │  SequentialChainExecutor              built-in policies     │
//! │  ExecutionContext   translate         ExtProcService (gRPC) │
//! │  admin HTTP server                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod body_mode;
pub mod chain;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod headers;
pub mod metadata;
pub mod policy;

// ── Flat re-exports ────────────────────────────────────────────────────────

pub use action::{HeaderMutations, ImmediateResponse, Mutations, PolicyAction};
pub use body_mode::{BodyMode, request_body_mode, response_body_mode};
pub use chain::{
    BoundPolicy, BoundRequestPolicy, BoundResponsePolicy, ChainSummary, PolicyChain, PolicySpec,
};
pub use condition::{Condition, ConditionScope};
pub use context::{Body, RequestContext, RequestView, ResponseContext};
pub use error::{ConfigError, ConfigResult, PolicyError};
pub use executor::{ChainExecutor, ExecutionResult, PolicyOutcome};
pub use headers::Headers;
pub use metadata::Metadata;
pub use policy::{
    BodyRequirement, ParamsValidator, PolicyImpl, PolicyMode, PolicyParams, PolicyRegistry,
    RequestPolicy, ResponsePolicy,
};
