//! Collection orchestrator (C3) and the collection job.
//!
//! Drives the two upstream clients across the configured team →
//! repositories and team → members tables with three bounded pools.
//! One client instance per job, shared by all workers, so rate-limit
//! pacing stays global. Output record sets are deduplicated and sorted
//! deterministically before hand-off to the metrics kernel.

mod adapters;
mod job;
mod orchestrator;

pub use adapters::{IssueSource, RepoSource};
pub use job::{run_collection_job, JobOutcome};
pub use orchestrator::{CollectionOutcome, Collector, PoolSizes, TeamPlan};
