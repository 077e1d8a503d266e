//! Dashboard HTTP surface (C9).
//!
//! Routes dispatch into the metrics kernel and cache for reads, and
//! into the collector and event bus for writes. The middleware chain,
//! outermost first: rate-limit → auth → input-validate → route. All
//! shared state is owned by an explicit [`ServerContext`] handed to
//! handlers — no process globals — so tests instantiate a fresh one.

pub mod auth;
pub mod context;
pub mod error;
pub mod export;
pub mod middleware;
pub mod routes;
pub mod server;

pub use context::{ServerContext, SharedContext};
pub use server::{build_router, run};
