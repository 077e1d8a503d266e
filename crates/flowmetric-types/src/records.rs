//! Raw collected records.
//!
//! Records are produced only by the upstream collectors and never mutated
//! after ingest. The PR↔review↔commit↔release graph is expressed as flat
//! tables joined on stable ids (PR id, sha, tag) — no back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a repository on the source-hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Organization or user owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Build a reference from an `owner/name` pair.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. Returns `None` if the slash is missing.
    #[must_use]
    pub fn parse(full: &str) -> Option<Self> {
        let (owner, name) = full.split_once('/')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A pull request as collected from the source host.
///
/// `merged_at` is `None` for open or closed-unmerged PRs. `issue_keys`
/// holds tracker keys extracted from the title, body and head branch at
/// ingest time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Stable numeric id within the repository.
    pub id: u64,
    /// Repository the PR belongs to.
    pub repo: RepoRef,
    /// Author login.
    pub author: String,
    /// PR title.
    pub title: String,
    /// PR body (may be empty).
    #[serde(default)]
    pub body: String,
    /// Head branch name, when the API reported one.
    #[serde(default)]
    pub head_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Merge timestamp; `None` when not merged.
    pub merged_at: Option<DateTime<Utc>>,
    /// Close timestamp; `None` while open.
    pub closed_at: Option<DateTime<Utc>>,
    /// Whether the PR was merged.
    pub merged: bool,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
    /// Changed file count.
    pub changed_files: u64,
    /// Shas of commits on the PR.
    #[serde(default)]
    pub commit_shas: Vec<String>,
    /// Tracker issue keys referenced by title/body/branch.
    #[serde(default)]
    pub issue_keys: Vec<String>,
}

impl PullRequest {
    /// Principal timestamp used for windowing: `merged_at` when merged,
    /// otherwise `created_at`.
    #[must_use]
    pub fn principal_timestamp(&self) -> DateTime<Utc> {
        self.merged_at.unwrap_or(self.created_at)
    }

    /// Total changed lines (additions + deletions).
    #[must_use]
    pub fn changed_lines(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// Review verdict states reported by the source host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
}

/// A single review submitted on a PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Id of the reviewed PR.
    pub pr_id: u64,
    /// Repository of the reviewed PR.
    pub repo: RepoRef,
    /// Reviewer login.
    pub reviewer: String,
    /// Verdict.
    pub state: ReviewState,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

/// A commit as collected from the source host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit sha.
    pub sha: String,
    /// Author login.
    pub author: String,
    /// Author timestamp.
    pub authored_at: DateTime<Utc>,
    /// Added lines.
    pub additions: u64,
    /// Deleted lines.
    pub deletions: u64,
    /// Repository containing the commit.
    pub repo: RepoRef,
    /// PR the commit was observed on, when known.
    #[serde(default)]
    pub pr_id: Option<u64>,
}

/// Environment a release deploys to, derived from configured tag rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseEnvironment {
    Production,
    Staging,
    Other,
}

/// A release published on the source host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Release tag.
    pub tag: String,
    /// Release display name.
    pub name: String,
    /// Publication timestamp.
    pub published_at: DateTime<Utc>,
    /// Prerelease flag.
    pub prerelease: bool,
    /// Repository the release belongs to.
    pub repo: RepoRef,
    /// Derived environment classification.
    pub environment: ReleaseEnvironment,
}

impl Release {
    /// Whether this release counts toward deployment metrics.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == ReleaseEnvironment::Production && !self.prerelease
    }
}

/// One status transition in an issue's changelog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueTransition {
    /// Status before the transition.
    pub from: String,
    /// Status after the transition.
    pub to: String,
    /// Transition timestamp.
    pub at: DateTime<Utc>,
}

/// An issue as collected from the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue key, e.g. `PROJ-123`.
    pub key: String,
    /// Issue type name.
    pub issue_type: String,
    /// Current stored status.
    pub status: String,
    /// Assignee login, when assigned.
    #[serde(default)]
    pub assignee: Option<String>,
    /// Reporter login.
    #[serde(default)]
    pub reporter: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp, when resolved.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Ordered status transitions; empty when changelog expansion was
    /// disabled for the dataset.
    #[serde(default)]
    pub transitions: Vec<IssueTransition>,
    /// Fix-version names the issue belongs to.
    #[serde(default)]
    pub fix_versions: Vec<String>,
    /// Labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Priority name.
    #[serde(default)]
    pub priority: Option<String>,
}

impl Issue {
    /// Status of the issue at time `t`.
    ///
    /// The latest transition with `at <= t` determines the status. Before
    /// the first transition the status is that transition's `from` state.
    /// Without any transitions the current stored status is used (the
    /// caller should treat the answer as approximated in that case).
    #[must_use]
    pub fn status_at(&self, t: DateTime<Utc>) -> &str {
        let mut current: Option<&IssueTransition> = None;
        for transition in &self.transitions {
            if transition.at <= t {
                current = Some(transition);
            } else {
                break;
            }
        }
        match (current, self.transitions.first()) {
            (Some(transition), _) => &transition.to,
            (None, Some(first)) => &first.from,
            (None, None) => &self.status,
        }
    }

    /// Whether the issue reached resolution, and how long it took.
    #[must_use]
    pub fn resolution_duration(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|resolved| resolved - self.created_at)
    }
}

/// A fix-version enumerated from the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixVersion {
    /// Version name, e.g. `v1.2.3`.
    pub name: String,
    /// Released flag.
    pub released: bool,
    /// Release date, when released.
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    /// Keys of issues shipped in this version.
    #[serde(default)]
    pub issue_keys: Vec<String>,
}
