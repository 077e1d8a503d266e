//! The metrics kernel: record set in, team metrics out.

use crate::dora::{self, DoraOptions};
use crate::stats::{mean, median};
use crate::trends::{weekly_counts, weekly_medians};
use chrono::{DateTime, Utc};
use flowmetric_types::{
    ContributorActivity, CycleTimeStats, MetricValue, PrMetrics, PullRequest, Review,
    ReviewMetrics, ReviewerCount, SizeBucket, TeamMetrics, TeamRecordSet, TeamTrends, Window,
};
use std::collections::BTreeMap;

/// Computes [`TeamMetrics`] from a normalized [`TeamRecordSet`].
///
/// All methods are pure; the kernel itself only carries tunables.
#[derive(Debug, Clone, Default)]
pub struct MetricsKernel {
    dora: DoraOptions,
}

impl MetricsKernel {
    /// Kernel with delivery-metric tunables.
    #[must_use]
    pub fn new(dora: DoraOptions) -> Self {
        Self { dora }
    }

    /// Compute the full team metric structure.
    #[must_use]
    pub fn compute_team(&self, set: &TeamRecordSet) -> TeamMetrics {
        let window = set.window.unwrap_or_else(|| {
            // A record set without a window can only hold records that
            // were never windowed; treat its full data range as the
            // window so pure computations still apply.
            let now = Utc::now();
            Window::new(now, now)
        });

        let pr = pr_metrics(&set.prs, &set.reviews);
        let review = review_metrics(&set.reviews);
        let contributors = contributor_metrics(&set.commits);
        let delivery = dora::compute(set, &window, &self.dora);
        let trends = team_trends(set, &window);

        TeamMetrics {
            team: set.team.clone(),
            window: set.window,
            pr,
            review,
            contributors,
            delivery,
            issue_count: set.issues.len() as u64,
            completed_issues: set
                .issues
                .iter()
                .filter(|issue| issue.resolved_at.is_some_and(|t| window.contains(t)))
                .count() as u64,
            changelog_expanded: set.changelog_expanded,
            partial: set.partial,
            trends,
        }
    }
}

/// Cycle time in hours for a merged PR; `None` for unmerged or
/// inverted timestamps (cycle time is never negative).
fn cycle_hours(pr: &PullRequest) -> Option<f64> {
    let merged_at = pr.merged_at?;
    let hours = (merged_at - pr.created_at).num_seconds() as f64 / 3600.0;
    (hours >= 0.0).then_some(hours)
}

fn pr_metrics(prs: &[PullRequest], reviews: &[Review]) -> PrMetrics {
    let merged = prs.iter().filter(|pr| pr.merged).count() as u64;
    let closed_unmerged = prs
        .iter()
        .filter(|pr| !pr.merged && pr.closed_at.is_some())
        .count() as u64;
    let open = prs.len() as u64 - merged - closed_unmerged;

    let denominator = merged + closed_unmerged + open;
    let merge_rate = if denominator == 0 {
        MetricValue::InsufficientData
    } else {
        MetricValue::Value(merged as f64 / denominator as f64)
    };

    let cycles: Vec<f64> = prs.iter().filter_map(cycle_hours).collect();
    let mut by_size: BTreeMap<SizeBucket, Vec<f64>> = BTreeMap::new();
    for pr in prs {
        if let Some(hours) = cycle_hours(pr) {
            by_size
                .entry(SizeBucket::for_lines(pr.changed_lines()))
                .or_default()
                .push(hours);
        }
    }
    let cycle_time = CycleTimeStats {
        mean_hours: mean(&cycles).into(),
        median_hours: median(&cycles).into(),
        by_size_hours: by_size
            .into_iter()
            .map(|(bucket, hours)| (bucket, median(&hours).into()))
            .collect(),
    };

    PrMetrics {
        total: prs.len() as u64,
        merged,
        closed_unmerged,
        open,
        merge_rate,
        cycle_time,
        time_to_first_review_hours: time_to_first_review(prs, reviews).into(),
    }
}

/// Mean hours to the first non-author review, over PRs that received at
/// least one.
fn time_to_first_review(prs: &[PullRequest], reviews: &[Review]) -> Option<f64> {
    let mut waits = Vec::new();
    for pr in prs {
        let first_review: Option<DateTime<Utc>> = reviews
            .iter()
            .filter(|review| {
                review.repo == pr.repo && review.pr_id == pr.id && review.reviewer != pr.author
            })
            .map(|review| review.submitted_at)
            .min();
        if let Some(first) = first_review {
            let hours = (first - pr.created_at).num_seconds() as f64 / 3600.0;
            if hours >= 0.0 {
                waits.push(hours);
            }
        }
    }
    mean(&waits)
}

fn review_metrics(reviews: &[Review]) -> ReviewMetrics {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for review in reviews {
        *counts.entry(review.reviewer.as_str()).or_default() += 1;
    }

    let mut top: Vec<ReviewerCount> = counts
        .iter()
        .map(|(login, count)| ReviewerCount {
            login: (*login).to_string(),
            count: *count,
        })
        .collect();
    // Count desc, then login asc; the BTreeMap iteration already gives
    // login order, and the stable sort preserves it within equal counts.
    top.sort_by(|a, b| b.count.cmp(&a.count));
    top.truncate(10);

    ReviewMetrics {
        total: reviews.len() as u64,
        unique_reviewers: counts.len() as u64,
        top_reviewers: top,
    }
}

fn contributor_metrics(commits: &[flowmetric_types::Commit]) -> Vec<ContributorActivity> {
    let mut by_author: BTreeMap<&str, ContributorActivity> = BTreeMap::new();
    for commit in commits {
        let activity = by_author
            .entry(commit.author.as_str())
            .or_insert_with(|| ContributorActivity {
                login: commit.author.clone(),
                ..Default::default()
            });
        activity.commits += 1;
        activity.additions += commit.additions;
        activity.deletions += commit.deletions;
        *activity
            .daily
            .entry(commit.authored_at.date_naive())
            .or_default() += 1;
    }
    by_author.into_values().collect()
}

fn team_trends(set: &TeamRecordSet, window: &Window) -> TeamTrends {
    TeamTrends {
        merged_prs: weekly_counts(
            set.prs.iter().filter_map(|pr| pr.merged_at),
            window,
        ),
        cycle_time_hours: weekly_medians(
            set.prs
                .iter()
                .filter_map(|pr| Some((pr.merged_at?, cycle_hours(pr)?))),
            window,
        ),
        reviews: weekly_counts(set.reviews.iter().map(|r| r.submitted_at), window),
        commits: weekly_counts(set.commits.iter().map(|c| c.authored_at), window),
    }
}
