//! Shared data model for the Flowmetric workspace.
//!
//! This crate defines the closed record structs produced by the upstream
//! collectors, the derived aggregates served by the dashboard, the
//! range-spec grammar used for cache keying, and the metric sentinels
//! that distinguish "no data" from a legitimate zero.

mod metric_value;
mod metrics;
mod range;
mod records;
mod rules;
mod weights;

pub use metric_value::MetricValue;
pub use metrics::{
    ComparisonRow, ContributorActivity, CycleTimeStats, DeliveryMetrics, IncidentSummary,
    LeadTimeStats, MetricsBundle, MetricsMetadata, MttrStats, PerformanceLevel, PersonMetrics,
    PrMetrics, ReviewMetrics, ReviewerCount, SizeBucket, TeamMetrics, TeamRecordSet, TeamTrends,
    TrendPoint,
};
pub use range::{RangeSpec, RangeSpecError, Window};
pub use records::{
    Commit, FixVersion, Issue, IssueTransition, PullRequest, Release, ReleaseEnvironment, RepoRef,
    Review, ReviewState,
};
pub use rules::{extract_issue_keys, ReleaseRules, RuleError};
pub use weights::{PerformanceWeights, WeightError};
