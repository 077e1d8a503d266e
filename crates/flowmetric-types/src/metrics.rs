//! Derived aggregates: record sets, team/person metrics, comparison rows.

use crate::{
    Commit, FixVersion, Issue, MetricValue, PullRequest, RangeSpec, Release, Review, Window,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All raw records collected for one team, restricted to a window.
///
/// Constructed once per collection job and discarded after metrics are
/// computed. `normalize()` must run before hand-off to the kernel so
/// downstream metrics are stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamRecordSet {
    /// Team name.
    pub team: String,
    /// The absolute collection window.
    pub window: Option<Window>,
    /// Pull requests, unique by `(repo, id)` after normalization.
    pub prs: Vec<PullRequest>,
    /// Reviews on the above PRs.
    pub reviews: Vec<Review>,
    /// Commits.
    pub commits: Vec<Commit>,
    /// Releases.
    pub releases: Vec<Release>,
    /// Tracker issues.
    pub issues: Vec<Issue>,
    /// Fix-versions enumerated from the tracker.
    pub fix_versions: Vec<FixVersion>,
    /// Whether any contributing query returned a partial result.
    pub partial: bool,
    /// Whether issue changelogs were expanded (§ adaptive pagination).
    pub changelog_expanded: bool,
    /// Work units that failed permanently this run (`repo:acme/widgets`,
    /// `person:alice`).
    pub failed_units: Vec<String>,
}

impl TeamRecordSet {
    /// Deduplicate and sort deterministically.
    ///
    /// PRs by `(repo, id)` (duplicates from overlapping queries dropped),
    /// reviews by `(PR, submitted_at, reviewer)`, commits by sha, issues
    /// by key, releases by `(published_at, repo, tag)`.
    pub fn normalize(&mut self) {
        self.prs.sort_by(|a, b| {
            (&a.repo, a.id).cmp(&(&b.repo, b.id))
        });
        self.prs.dedup_by(|a, b| a.repo == b.repo && a.id == b.id);

        self.reviews.sort_by(|a, b| {
            (&a.repo, a.pr_id, a.submitted_at, &a.reviewer)
                .cmp(&(&b.repo, b.pr_id, b.submitted_at, &b.reviewer))
        });
        self.reviews
            .dedup_by(|a, b| a.repo == b.repo && a.pr_id == b.pr_id && a.reviewer == b.reviewer && a.submitted_at == b.submitted_at);

        self.commits.sort_by(|a, b| a.sha.cmp(&b.sha));
        self.commits.dedup_by(|a, b| a.sha == b.sha);

        self.issues.sort_by(|a, b| a.key.cmp(&b.key));
        self.issues.dedup_by(|a, b| a.key == b.key);

        self.releases.sort_by(|a, b| {
            (a.published_at, &a.repo, &a.tag).cmp(&(b.published_at, &b.repo, &b.tag))
        });
        self.releases
            .dedup_by(|a, b| a.repo == b.repo && a.tag == b.tag);

        self.fix_versions.sort_by(|a, b| a.name.cmp(&b.name));
        self.fix_versions.dedup_by(|a, b| a.name == b.name);

        self.failed_units.sort();
        self.failed_units.dedup();
    }
}

/// PR size buckets over `additions + deletions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    Xs,
    S,
    M,
    L,
    Xl,
}

impl SizeBucket {
    /// Bucket for a changed-line count.
    #[must_use]
    pub fn for_lines(lines: u64) -> Self {
        match lines {
            0..=9 => Self::Xs,
            10..=99 => Self::S,
            100..=499 => Self::M,
            500..=999 => Self::L,
            _ => Self::Xl,
        }
    }
}

/// Cycle-time distribution for merged PRs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleTimeStats {
    /// Mean hours from creation to merge.
    pub mean_hours: MetricValue,
    /// Median hours from creation to merge.
    pub median_hours: MetricValue,
    /// Median hours per size bucket.
    pub by_size_hours: BTreeMap<SizeBucket, MetricValue>,
}

/// Per-team PR rollups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrMetrics {
    /// PRs observed in the window.
    pub total: u64,
    /// Merged in the window.
    pub merged: u64,
    /// Closed without merging.
    pub closed_unmerged: u64,
    /// Still open at window end.
    pub open: u64,
    /// merged / (merged + closed-unmerged + open).
    pub merge_rate: MetricValue,
    /// Cycle-time distribution.
    pub cycle_time: CycleTimeStats,
    /// Average hours to first non-author review, over PRs with >= 1
    /// review.
    pub time_to_first_review_hours: MetricValue,
}

/// One reviewer with a review count; comparison key for top-reviewer
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerCount {
    /// Reviewer login.
    pub login: String,
    /// Reviews submitted in the window.
    pub count: u64,
}

/// Per-team review rollups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetrics {
    /// Reviews submitted in the window.
    pub total: u64,
    /// Distinct reviewer logins.
    pub unique_reviewers: u64,
    /// Reviewers by count desc, login asc.
    pub top_reviewers: Vec<ReviewerCount>,
}

/// Per-contributor commit activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributorActivity {
    /// Contributor login.
    pub login: String,
    /// Commit count.
    pub commits: u64,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
    /// Commits per UTC author-date.
    pub daily: BTreeMap<NaiveDate, u64>,
}

/// One point in a weekly trend. `value` is `None` for weeks with no
/// observations — not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// ISO week start (Monday, UTC).
    pub week_start: NaiveDate,
    /// Observed value, when the week had observations.
    pub value: Option<f64>,
}

/// Lead-time statistics over release-attributed PRs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadTimeStats {
    /// Median hours merge→release.
    pub median_hours: MetricValue,
    /// 75th percentile.
    pub p75_hours: MetricValue,
    /// 90th percentile.
    pub p90_hours: MetricValue,
    /// PRs attributed across all production releases.
    pub attributed_prs: u64,
}

/// Shortened incident record for the recent-incidents list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    /// Issue key.
    pub key: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp, when resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Hours to restore, when resolved.
    pub restore_hours: Option<f64>,
}

/// Mean-time-to-restore statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MttrStats {
    /// Median hours create→resolve over resolved incidents.
    pub median_hours: MetricValue,
    /// 95th percentile.
    pub p95_hours: MetricValue,
    /// The ten most recent incidents.
    pub recent: Vec<IncidentSummary>,
}

/// DORA performance levels. Tie-break picks the worst level across the
/// four axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Elite,
    High,
    Medium,
    Low,
}

/// The four delivery metrics plus classification and trends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetrics {
    /// Production releases per day over the measurement period.
    pub deployment_frequency_per_day: MetricValue,
    /// Weekly deployment counts.
    pub weekly_deployments: Vec<TrendPoint>,
    /// Lead time for changes.
    pub lead_time: LeadTimeStats,
    /// failed releases / total production releases.
    pub change_failure_rate: MetricValue,
    /// Mean time to restore.
    pub mttr: MttrStats,
    /// Classification over (DF, LT, CFR, MTTR); absent when any axis is
    /// not a finite number.
    pub performance_level: Option<PerformanceLevel>,
    /// Effective measurement window (requested window ∩ observed data
    /// range); `None` means all delivery axes are not-applicable.
    pub measured: Option<Window>,
}

/// Weekly trends for the headline team metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTrends {
    /// PRs merged per week.
    pub merged_prs: Vec<TrendPoint>,
    /// Median cycle time per week (hours).
    pub cycle_time_hours: Vec<TrendPoint>,
    /// Reviews per week.
    pub reviews: Vec<TrendPoint>,
    /// Commits per week.
    pub commits: Vec<TrendPoint>,
}

/// Full metric structure for one team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMetrics {
    /// Team name.
    pub team: String,
    /// The requested window.
    pub window: Option<Window>,
    /// PR rollups.
    pub pr: PrMetrics,
    /// Review rollups.
    pub review: ReviewMetrics,
    /// Per-contributor activity, sorted by login.
    pub contributors: Vec<ContributorActivity>,
    /// Delivery metrics.
    pub delivery: DeliveryMetrics,
    /// Issues observed in the window.
    pub issue_count: u64,
    /// Issues resolved in the window.
    pub completed_issues: u64,
    /// Whether issue changelogs were expanded for this dataset.
    pub changelog_expanded: bool,
    /// Whether any input was partial.
    pub partial: bool,
    /// Weekly trends.
    pub trends: TeamTrends,
}

/// Metrics restricted to a single contributor, plus the peer-normalized
/// performance score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonMetrics {
    /// Contributor login on the source host.
    pub login: String,
    /// Team the contributor belongs to.
    pub team: String,
    /// PRs authored in the window.
    pub pr_count: u64,
    /// Reviews submitted in the window.
    pub review_count: u64,
    /// Commits authored in the window.
    pub commit_count: u64,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
    /// Median cycle time of authored merged PRs, in hours.
    pub cycle_time_hours: MetricValue,
    /// Merge rate of authored PRs.
    pub merge_rate: MetricValue,
    /// Tracker issues completed in the window.
    pub completed_issues: u64,
    /// Team-level deployment frequency (shared across teammates).
    pub deployment_frequency_per_day: MetricValue,
    /// Team-level lead time median, hours.
    pub lead_time_hours: MetricValue,
    /// Team-level change failure rate.
    pub change_failure_rate: MetricValue,
    /// Team-level MTTR median, hours.
    pub mttr_hours: MetricValue,
    /// Weighted peer-normalized score in [0, 100], one decimal.
    pub score: Option<f64>,
}

/// One row of the cross-team comparison table (common projected schema).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    /// Team name.
    pub team: String,
    /// Merged PRs.
    pub merged_prs: u64,
    /// Merge rate.
    pub merge_rate: MetricValue,
    /// Median cycle time, hours.
    pub cycle_time_hours: MetricValue,
    /// Reviews.
    pub reviews: u64,
    /// Deployment frequency per day.
    pub deployment_frequency_per_day: MetricValue,
    /// Lead-time median, hours.
    pub lead_time_hours: MetricValue,
    /// Change failure rate.
    pub change_failure_rate: MetricValue,
    /// MTTR median, hours.
    pub mttr_hours: MetricValue,
    /// Performance level, when classifiable.
    pub performance_level: Option<PerformanceLevel>,
}

/// Metadata envelope carried by every served payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsMetadata {
    /// When the bundle was generated.
    pub generated_at: DateTime<Utc>,
    /// Canonical range spec.
    pub range_spec: String,
    /// Environment name.
    pub environment: String,
}

/// The cache-artifact payload: everything the dashboard serves for one
/// `(range, environment)` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsBundle {
    /// Per-team metrics, sorted by team name.
    pub teams: Vec<TeamMetrics>,
    /// Per-person metrics, sorted by login.
    pub persons: Vec<PersonMetrics>,
    /// Cross-team comparison rows.
    pub comparison: Vec<ComparisonRow>,
    /// Envelope metadata.
    pub metadata: MetricsMetadata,
    /// Whether any contributing collection was partial.
    pub partial: bool,
}

impl MetricsBundle {
    /// Resolve the bundle's range spec back to a typed value.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the stored spec is malformed (only
    /// possible for artifacts written by a foreign producer).
    pub fn range_spec(&self) -> Result<RangeSpec, crate::RangeSpecError> {
        self.metadata.range_spec.parse()
    }
}
