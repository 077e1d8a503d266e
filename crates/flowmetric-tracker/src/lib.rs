//! Issue-tracker upstream client (C2).
//!
//! JQL-based search against the tracker's REST API. The hard part is
//! fetching very large filter result sets without tripping gateway
//! timeouts: an inexpensive count query first, then batch size and
//! changelog expansion chosen from the count (see [`PaginationPlan`]).
//! Per-batch retries back off exponentially; exhausted retries return
//! whatever was collected, flagged partial.

mod client;
mod pagination;
mod wire;

pub use client::{Filter, SearchOutcome, TrackerClient};
pub use pagination::{PaginationPlan, PaginationSettings};
