//! Per-contributor metrics.

use crate::stats::median;
use flowmetric_types::{
    Commit, DeliveryMetrics, Issue, MetricValue, PersonMetrics, PullRequest, Review, Window,
};

/// The slice of collected data belonging to one contributor.
#[derive(Debug, Clone, Default)]
pub struct PersonInputs {
    /// Source-host login.
    pub login: String,
    /// Team name.
    pub team: String,
    /// PRs authored by the contributor.
    pub prs: Vec<PullRequest>,
    /// Reviews submitted by the contributor.
    pub reviews: Vec<Review>,
    /// Commits authored by the contributor.
    pub commits: Vec<Commit>,
    /// Tracker issues assigned to the contributor.
    pub issues: Vec<Issue>,
}

impl PersonInputs {
    /// Compute person metrics. Delivery axes come from the
    /// contributor's team, since deployments are a team outcome.
    #[must_use]
    pub fn compute(&self, window: &Window, team_delivery: &DeliveryMetrics) -> PersonMetrics {
        let merged = self.prs.iter().filter(|pr| pr.merged).count() as u64;
        let total = self.prs.len() as u64;
        let merge_rate = if total == 0 {
            MetricValue::InsufficientData
        } else {
            MetricValue::Value(merged as f64 / total as f64)
        };

        let cycles: Vec<f64> = self
            .prs
            .iter()
            .filter_map(|pr| {
                let merged_at = pr.merged_at?;
                let hours = (merged_at - pr.created_at).num_seconds() as f64 / 3600.0;
                (hours >= 0.0).then_some(hours)
            })
            .collect();

        PersonMetrics {
            login: self.login.clone(),
            team: self.team.clone(),
            pr_count: total,
            review_count: self.reviews.len() as u64,
            commit_count: self.commits.len() as u64,
            additions: self.commits.iter().map(|c| c.additions).sum(),
            deletions: self.commits.iter().map(|c| c.deletions).sum(),
            cycle_time_hours: median(&cycles).into(),
            merge_rate,
            completed_issues: self
                .issues
                .iter()
                .filter(|issue| issue.resolved_at.is_some_and(|t| window.contains(t)))
                .count() as u64,
            deployment_frequency_per_day: team_delivery.deployment_frequency_per_day,
            lead_time_hours: team_delivery.lead_time.median_hours,
            change_failure_rate: team_delivery.change_failure_rate,
            mttr_hours: team_delivery.mttr.median_hours,
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use flowmetric_types::RepoRef;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_person_rollups() {
        let repo = RepoRef::new("acme", "widgets");
        let inputs = PersonInputs {
            login: "alice".to_string(),
            team: "platform".to_string(),
            prs: vec![
                PullRequest {
                    id: 1,
                    repo: repo.clone(),
                    author: "alice".to_string(),
                    title: String::new(),
                    body: String::new(),
                    head_ref: None,
                    created_at: ts("2026-03-01T00:00:00Z"),
                    merged_at: Some(ts("2026-03-02T00:00:00Z")),
                    closed_at: None,
                    merged: true,
                    additions: 1,
                    deletions: 1,
                    changed_files: 1,
                    commit_shas: vec![],
                    issue_keys: vec![],
                },
                PullRequest {
                    id: 2,
                    repo: repo.clone(),
                    author: "alice".to_string(),
                    title: String::new(),
                    body: String::new(),
                    head_ref: None,
                    created_at: ts("2026-03-05T00:00:00Z"),
                    merged_at: None,
                    closed_at: None,
                    merged: false,
                    additions: 1,
                    deletions: 1,
                    changed_files: 1,
                    commit_shas: vec![],
                    issue_keys: vec![],
                },
            ],
            commits: vec![Commit {
                sha: "abc".to_string(),
                author: "alice".to_string(),
                authored_at: ts("2026-03-01T12:00:00Z"),
                additions: 30,
                deletions: 12,
                repo,
                pr_id: Some(1),
            }],
            ..Default::default()
        };

        let window = Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"));
        let person = inputs.compute(&window, &DeliveryMetrics::default());

        assert_eq!(person.pr_count, 2);
        assert_eq!(person.commit_count, 1);
        assert_eq!(person.additions, 30);
        assert_eq!(person.merge_rate, MetricValue::Value(0.5));
        assert_eq!(person.cycle_time_hours, MetricValue::Value(24.0));
        assert!(person.score.is_none());
    }

    #[test]
    fn test_person_without_prs_has_sentinels() {
        let inputs = PersonInputs {
            login: "bob".to_string(),
            team: "platform".to_string(),
            ..Default::default()
        };
        let window = Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"));
        let person = inputs.compute(&window, &DeliveryMetrics::default());
        assert_eq!(person.merge_rate, MetricValue::InsufficientData);
        assert_eq!(person.cycle_time_hours, MetricValue::InsufficientData);
    }
}
