//! `gatehouse-gateway` — external-processing runtime for the Gatehouse
//! policy kernel.
//!
//! The proxy opens one bidirectional gRPC stream per HTTP exchange and
//! forwards request headers, request body, response headers and response
//! body as separate messages.  This crate resolves the route's
//! [`PolicyChain`](gatehouse_kernel::PolicyChain), runs it phase by phase
//! and answers each message with the mutations the policies produced.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`registry`] | Route registry (lock-protected map) and in-memory policy registry |
//! | [`loader`] | Route file → validated chains → registry, atomically |
//! | [`watcher`] | Route file hot reload |
//! | [`executor`] | Sequential chain executor with optional per-policy timeout |
//! | [`context`] | Per-stream execution state machine |
//! | [`translate`] | Execution results → wire replies |
//! | [`service`] | The `ExternalProcessor` gRPC service |
//! | [`policies`] | Built-in policies |
//! | [`admin`] | Admin HTTP endpoints |
//! | [`server`] | Composition root |

pub mod admin;
pub mod context;
pub mod error;
pub mod executor;
pub mod loader;
pub mod policies;
pub mod registry;
pub mod server;
pub mod service;
pub mod settings;
pub mod translate;
pub mod watcher;

/// Generated wire types of the external-processing protocol.
pub mod proto {
    tonic::include_proto!("gatehouse.extproc.v1");
}

pub use error::{GatewayError, GatewayResult};
pub use executor::SequentialChainExecutor;
pub use loader::{ConfigLoader, LoadSummary, ReloadMode};
pub use registry::{InMemoryPolicyRegistry, RouteRegistry};
pub use server::GatehouseServer;
pub use service::{ExtProcService, RouteKeyLocator};
pub use settings::{GatewaySettings, LogFormat};
pub use watcher::ConfigWatcher;
