//! Registries owned by the composition root.
//!
//! - [`RouteRegistry`]: route key → [`PolicyChain`](gatehouse_kernel::PolicyChain),
//!   the only state shared across streams.
//! - [`InMemoryPolicyRegistry`]: `(name, version)` → policy implementation,
//!   consulted by the loader.

pub mod policies;
pub mod routes;

pub use policies::InMemoryPolicyRegistry;
pub use routes::RouteRegistry;
