//! GraphQL wire envelope.
//!
//! Tolerant raw types exist only at this boundary; everything past the
//! client is a closed record struct.

use chrono::{DateTime, Utc};
use flowmetric_types::{
    extract_issue_keys, Commit, PullRequest, Release, ReleaseRules, RepoRef, Review, ReviewState,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse {
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    #[serde(rename = "endCursor")]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Connection<T> {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryData {
    #[serde(rename = "pullRequests")]
    pub pull_requests: Option<Connection<PrNode>>,
    pub releases: Option<Connection<ReleaseNode>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Actor {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrNode {
    pub number: u64,
    pub author: Option<Actor>,
    pub title: String,
    #[serde(rename = "bodyText", default)]
    pub body_text: String,
    #[serde(rename = "headRefName")]
    pub head_ref_name: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "mergedAt")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(rename = "closedAt")]
    pub closed_at: Option<DateTime<Utc>>,
    pub merged: bool,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(rename = "changedFiles", default)]
    pub changed_files: u64,
    pub commits: Option<Connection<CommitEdge>>,
    pub reviews: Option<Connection<ReviewNode>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitEdge {
    pub commit: CommitNode,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitNode {
    pub oid: String,
    #[serde(rename = "authoredDate")]
    pub authored_date: DateTime<Utc>,
    pub author: Option<CommitAuthor>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitAuthor {
    pub user: Option<Actor>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewNode {
    pub author: Option<Actor>,
    pub state: String,
    #[serde(rename = "submittedAt")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseNode {
    #[serde(rename = "tagName")]
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "publishedAt")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(rename = "isPrerelease", default)]
    pub is_prerelease: bool,
}

fn review_state(raw: &str) -> Option<ReviewState> {
    match raw {
        "APPROVED" => Some(ReviewState::Approved),
        "CHANGES_REQUESTED" => Some(ReviewState::ChangesRequested),
        "COMMENTED" => Some(ReviewState::Commented),
        "DISMISSED" => Some(ReviewState::Dismissed),
        _ => None,
    }
}

/// Flatten one PR node into records. Reviews without a submission
/// timestamp (pending) and unknown review states are dropped.
pub(crate) fn convert_pr(
    node: PrNode,
    repo: &RepoRef,
) -> (PullRequest, Vec<Review>, Vec<Commit>) {
    let author = node.author.map_or_else(|| "ghost".to_string(), |a| a.login);

    let reviews: Vec<Review> = node
        .reviews
        .iter()
        .flat_map(|c| c.nodes.iter())
        .filter_map(|review| {
            Some(Review {
                pr_id: node.number,
                repo: repo.clone(),
                reviewer: review.author.as_ref()?.login.clone(),
                state: review_state(&review.state)?,
                submitted_at: review.submitted_at?,
            })
        })
        .collect();

    let commits: Vec<Commit> = node
        .commits
        .iter()
        .flat_map(|c| c.nodes.iter())
        .map(|edge| {
            let commit = &edge.commit;
            let author = commit
                .author
                .as_ref()
                .and_then(|a| a.user.as_ref().map(|u| u.login.clone()).or_else(|| a.name.clone()))
                .unwrap_or_else(|| "unknown".to_string());
            Commit {
                sha: commit.oid.clone(),
                author,
                authored_at: commit.authored_date,
                additions: commit.additions,
                deletions: commit.deletions,
                repo: repo.clone(),
                pr_id: Some(node.number),
            }
        })
        .collect();

    let commit_shas = commits.iter().map(|c| c.sha.clone()).collect();
    let issue_keys = extract_issue_keys(&node.title, &node.body_text, node.head_ref_name.as_deref());

    let pr = PullRequest {
        id: node.number,
        repo: repo.clone(),
        author,
        title: node.title,
        body: node.body_text,
        head_ref: node.head_ref_name,
        created_at: node.created_at,
        merged_at: node.merged_at,
        closed_at: node.closed_at,
        merged: node.merged,
        additions: node.additions,
        deletions: node.deletions,
        changed_files: node.changed_files,
        commit_shas,
        issue_keys,
    };

    (pr, reviews, commits)
}

/// Convert a release node, classifying its environment. Unpublished
/// drafts (no `publishedAt`) yield `None`.
pub(crate) fn convert_release(
    node: ReleaseNode,
    repo: &RepoRef,
    rules: &ReleaseRules,
) -> Option<Release> {
    let published_at = node.published_at?;
    let name = node.name.unwrap_or_else(|| node.tag_name.clone());
    let environment = rules.classify(&node.tag_name, &name);
    Some(Release {
        tag: node.tag_name,
        name,
        published_at,
        prerelease: node.is_prerelease,
        repo: repo.clone(),
        environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmetric_types::ReleaseEnvironment;

    const PR_FIXTURE: &str = r#"{
        "number": 42,
        "author": {"login": "alice"},
        "title": "PROJ-7 fix pagination",
        "bodyText": "also touches PROJ-8",
        "headRefName": "proj-7-fix",
        "createdAt": "2026-03-01T09:00:00Z",
        "mergedAt": "2026-03-02T10:30:00Z",
        "closedAt": "2026-03-02T10:30:00Z",
        "merged": true,
        "additions": 120,
        "deletions": 30,
        "changedFiles": 6,
        "commits": {
            "pageInfo": {"hasNextPage": false, "endCursor": null},
            "nodes": [
                {"commit": {"oid": "abc123", "authoredDate": "2026-03-01T10:00:00Z",
                 "author": {"user": {"login": "alice"}}, "additions": 120, "deletions": 30}}
            ]
        },
        "reviews": {
            "pageInfo": {"hasNextPage": false, "endCursor": null},
            "nodes": [
                {"author": {"login": "bob"}, "state": "APPROVED", "submittedAt": "2026-03-01T15:00:00Z"},
                {"author": {"login": "carol"}, "state": "PENDING", "submittedAt": null}
            ]
        }
    }"#;

    #[test]
    fn test_convert_pr_fixture() {
        let node: PrNode = serde_json::from_str(PR_FIXTURE).unwrap();
        let repo = RepoRef::new("acme", "widgets");
        let (pr, reviews, commits) = convert_pr(node, &repo);

        assert_eq!(pr.id, 42);
        assert_eq!(pr.author, "alice");
        assert!(pr.merged);
        assert_eq!(pr.issue_keys, vec!["PROJ-7".to_string(), "PROJ-8".to_string()]);
        assert_eq!(pr.commit_shas, vec!["abc123".to_string()]);

        // The pending review is dropped.
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].reviewer, "bob");
        assert_eq!(reviews[0].state, ReviewState::Approved);

        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].pr_id, Some(42));
    }

    #[test]
    fn test_convert_pr_deleted_author() {
        let node: PrNode = serde_json::from_str(
            r#"{"number": 1, "author": null, "title": "t", "createdAt": "2026-03-01T00:00:00Z",
                "mergedAt": null, "closedAt": null, "merged": false, "headRefName": null,
                "commits": null, "reviews": null}"#,
        )
        .unwrap();
        let (pr, reviews, commits) = convert_pr(node, &RepoRef::new("acme", "widgets"));
        assert_eq!(pr.author, "ghost");
        assert!(reviews.is_empty());
        assert!(commits.is_empty());
    }

    #[test]
    fn test_convert_release_classifies() {
        let rules = ReleaseRules::compile(&["^live-".to_string()], &[]).unwrap();
        let node: ReleaseNode = serde_json::from_str(
            r#"{"tagName": "live-42", "name": "Live 42",
                "publishedAt": "2026-03-01T00:00:00Z", "isPrerelease": false}"#,
        )
        .unwrap();
        let release = convert_release(node, &RepoRef::new("acme", "widgets"), &rules).unwrap();
        assert_eq!(release.environment, ReleaseEnvironment::Production);
    }

    #[test]
    fn test_convert_release_skips_drafts() {
        let node: ReleaseNode = serde_json::from_str(
            r#"{"tagName": "draft", "name": null, "publishedAt": null, "isPrerelease": false}"#,
        )
        .unwrap();
        assert!(convert_release(node, &RepoRef::new("a", "b"), &ReleaseRules::default()).is_none());
    }

    #[test]
    fn test_graphql_error_envelope() {
        let response: GraphQlResponse = serde_json::from_str(
            r#"{"data": null, "errors": [{"message": "Bad credentials"}]}"#,
        )
        .unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "Bad credentials");
    }
}
