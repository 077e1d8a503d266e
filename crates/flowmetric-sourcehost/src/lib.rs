//! Source-host upstream client (C1).
//!
//! Talks to the hosting platform's GraphQL endpoint with one
//! authenticated session per instance. A single query document batches
//! PR, review, commit and release pages; pagination is cursor-based and
//! terminates on an empty or fully-out-of-window page. Transient
//! failures are retried with exponential backoff; secondary rate limits
//! pause the session until the advertised reset.

mod client;
mod retry;
mod wire;

pub use client::{PersonCollection, RepoCollection, SourceHostClient};
pub use retry::RetryPolicy;
