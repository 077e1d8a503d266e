//! Trait seams over the upstream clients.
//!
//! The orchestrator talks to these traits, not the concrete clients, so
//! tests can drive it with deterministic fakes.

use async_trait::async_trait;
use flowmetric_error::Result;
use flowmetric_sourcehost::{PersonCollection, RepoCollection, SourceHostClient};
use flowmetric_tracker::{SearchOutcome, TrackerClient};
use flowmetric_types::{FixVersion, Window};

/// Source-host operations the orchestrator needs.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// PRs, reviews, commits and releases for one repository.
    async fn collect_repository(&self, owner: &str, repo: &str, window: &Window)
        -> Result<RepoCollection>;

    /// PRs, reviews and commits restricted to one contributor.
    async fn collect_person(&self, login: &str, window: &Window) -> Result<PersonCollection>;
}

/// Issue-tracker operations the orchestrator needs.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Resolve a saved filter to its JQL.
    async fn filter_jql(&self, id: u64) -> Result<String>;

    /// Windowed JQL search.
    async fn search_in_window(&self, jql: &str, window: &Window) -> Result<SearchOutcome>;

    /// Fix-versions of one project with contributing issues.
    async fn collect_releases(&self, project_key: &str, members: &[String])
        -> Result<Vec<FixVersion>>;
}

#[async_trait]
impl RepoSource for SourceHostClient {
    async fn collect_repository(
        &self,
        owner: &str,
        repo: &str,
        window: &Window,
    ) -> Result<RepoCollection> {
        self.collect_repository_metrics(owner, repo, window).await
    }

    async fn collect_person(&self, login: &str, window: &Window) -> Result<PersonCollection> {
        self.collect_person_metrics(login, window).await
    }
}

#[async_trait]
impl IssueSource for TrackerClient {
    async fn filter_jql(&self, id: u64) -> Result<String> {
        self.get_filter_jql(id).await
    }

    async fn search_in_window(&self, jql: &str, window: &Window) -> Result<SearchOutcome> {
        TrackerClient::search_in_window(self, jql, window).await
    }

    async fn collect_releases(
        &self,
        project_key: &str,
        members: &[String],
    ) -> Result<Vec<FixVersion>> {
        TrackerClient::collect_releases(self, project_key, members).await
    }
}
