//! The authenticated GraphQL session.

use crate::retry::RetryPolicy;
use crate::wire::{self, Connection, GraphQlResponse, PrNode, ReleaseNode, RepositoryData};
use chrono::Utc;
use flowmetric_error::{FlowError, Result};
use flowmetric_types::{Commit, PullRequest, Release, ReleaseRules, RepoRef, Review, Window};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAGE_SIZE: u32 = 50;

const PR_FIELDS: &str = r"
    number
    author { login }
    title
    bodyText
    headRefName
    createdAt
    mergedAt
    closedAt
    merged
    additions
    deletions
    changedFiles
    commits(first: 100) {
        pageInfo { hasNextPage endCursor }
        nodes {
            commit {
                oid
                authoredDate
                author { user { login } name }
                additions
                deletions
            }
        }
    }
    reviews(first: 100) {
        pageInfo { hasNextPage endCursor }
        nodes { author { login } state submittedAt }
    }
";

fn repository_query() -> String {
    format!(
        r"query RepoMetrics($owner: String!, $name: String!, $pageSize: Int!, $prCursor: String, $releaseCursor: String) {{
            repository(owner: $owner, name: $name) {{
                pullRequests(first: $pageSize, after: $prCursor, orderBy: {{field: CREATED_AT, direction: DESC}}) {{
                    pageInfo {{ hasNextPage endCursor }}
                    nodes {{ {PR_FIELDS} }}
                }}
                releases(first: $pageSize, after: $releaseCursor, orderBy: {{field: CREATED_AT, direction: DESC}}) {{
                    pageInfo {{ hasNextPage endCursor }}
                    nodes {{ tagName name publishedAt isPrerelease }}
                }}
            }}
        }}"
    )
}

fn search_query() -> String {
    format!(
        r"query PersonPrs($query: String!, $pageSize: Int!, $cursor: String) {{
            search(query: $query, type: ISSUE, first: $pageSize, after: $cursor) {{
                pageInfo {{ hasNextPage endCursor }}
                nodes {{ ... on PullRequest {{ {PR_FIELDS} }} }}
            }}
        }}"
    )
}

/// Everything collected for one repository.
#[derive(Debug, Default)]
pub struct RepoCollection {
    pub prs: Vec<PullRequest>,
    pub reviews: Vec<Review>,
    pub commits: Vec<Commit>,
    pub releases: Vec<Release>,
    /// True when one or more pages failed after all retries.
    pub partial: bool,
    pub failures: Vec<String>,
}

/// Everything collected for one contributor.
#[derive(Debug, Default)]
pub struct PersonCollection {
    pub prs: Vec<PullRequest>,
    pub reviews: Vec<Review>,
    pub commits: Vec<Commit>,
    pub partial: bool,
    pub failures: Vec<String>,
}

enum SendFailure {
    /// Pause until reset; does not consume a retry attempt.
    RateLimited(Duration),
    Transient(String),
    Permanent(String),
}

/// One authenticated session. A collection job holds exactly one
/// instance (shared across all workers) so rate-limit pacing is global.
#[derive(Debug)]
pub struct SourceHostClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    organization: String,
    time_offset_days: u32,
    page_size: u32,
    retry: RetryPolicy,
    rules: ReleaseRules,
    stop: Arc<AtomicBool>,
}

impl SourceHostClient {
    /// Build a session.
    ///
    /// # Errors
    ///
    /// `ConfigError` for a negative time offset or an unbuildable HTTP
    /// client.
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        organization: impl Into<String>,
        time_offset_days: i64,
        rules: ReleaseRules,
    ) -> Result<Self> {
        if time_offset_days < 0 {
            return Err(FlowError::Config(format!(
                "timeOffsetDays must be >= 0, got {time_offset_days}"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("flowmetric/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FlowError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
            organization: organization.into(),
            time_offset_days: time_offset_days as u32,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            rules,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share a cooperative stop flag; checked at every page boundary.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// The configured window shift in days.
    #[must_use]
    pub fn time_offset_days(&self) -> u32 {
        self.time_offset_days
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Shift the requested window back by the configured offset; results
    /// are post-filtered against the shifted window.
    fn effective_window(&self, window: &Window) -> Window {
        window.shifted_back(self.time_offset_days)
    }

    /// Collect merged PRs (with reviews and commits) and releases whose
    /// timestamps fall in the window.
    ///
    /// # Errors
    ///
    /// `UpstreamPermanent` on authentication or query errors. Transient
    /// exhaustion does not error: the collection comes back with
    /// `partial = true` and the failure messages.
    pub async fn collect_repository_metrics(
        &self,
        owner: &str,
        repo: &str,
        window: &Window,
    ) -> Result<RepoCollection> {
        let shifted = self.effective_window(window);
        let repo_ref = RepoRef::new(owner, repo);
        let mut collection = RepoCollection::default();

        let mut pr_cursor: Option<String> = None;
        let mut pr_done = false;
        let mut release_cursor: Option<String> = None;
        let mut release_done = false;
        let query = repository_query();

        while !pr_done || !release_done {
            if self.stopped() {
                collection.partial = true;
                collection.failures.push("collection cancelled".to_string());
                break;
            }

            let variables = json!({
                "owner": owner,
                "name": repo,
                "pageSize": self.page_size,
                "prCursor": pr_cursor,
                "releaseCursor": release_cursor,
            });
            let data = match self.execute(&query, variables).await {
                Ok(data) => data,
                Err(e) if e.is_transient() => {
                    collection.partial = true;
                    collection.failures.push(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            };

            let repository: RepositoryData = serde_json::from_value(
                data.get("repository").cloned().unwrap_or(Value::Null),
            )
            .map_err(|e| FlowError::UpstreamPermanent(format!("repository payload: {e}")))?;

            if !pr_done {
                match repository.pull_requests {
                    Some(page) => {
                        let (done, cursor) =
                            ingest_pr_page(page, &repo_ref, &shifted, &mut collection);
                        pr_done = done;
                        pr_cursor = cursor;
                    }
                    None => pr_done = true,
                }
            }
            if !release_done {
                match repository.releases {
                    Some(page) => {
                        let (done, cursor) =
                            self.ingest_release_page(page, &repo_ref, &shifted, &mut collection);
                        release_done = done;
                        release_cursor = cursor;
                    }
                    None => release_done = true,
                }
            }
        }

        debug!(
            repo = %repo_ref,
            prs = collection.prs.len(),
            releases = collection.releases.len(),
            partial = collection.partial,
            "repository collection finished"
        );
        Ok(collection)
    }

    /// Collect the PRs authored by `login`, the reviews they submitted,
    /// and their commits, restricted to the window.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::collect_repository_metrics`].
    pub async fn collect_person_metrics(
        &self,
        login: &str,
        window: &Window,
    ) -> Result<PersonCollection> {
        let shifted = self.effective_window(window);
        let mut collection = PersonCollection::default();

        let authored = format!(
            "org:{} is:pr author:{} created:{}..{}",
            self.organization,
            login,
            shifted.since.format("%Y-%m-%d"),
            shifted.until.format("%Y-%m-%d"),
        );
        // Reviews on authored PRs belong to the reviewers, not this
        // person, so only the PRs and own commits are kept here.
        self.collect_search(&authored, &shifted, |pr, _reviews, commits, out: &mut PersonCollection| {
            out.commits
                .extend(commits.into_iter().filter(|c| c.author == login));
            out.prs.push(pr);
        }, &mut collection)
        .await?;

        let reviewed = format!(
            "org:{} is:pr reviewed-by:{} updated:{}..{}",
            self.organization,
            login,
            shifted.since.format("%Y-%m-%d"),
            shifted.until.format("%Y-%m-%d"),
        );
        self.collect_search(&reviewed, &shifted, |_pr, reviews, _commits, out: &mut PersonCollection| {
            out.reviews.extend(
                reviews
                    .into_iter()
                    .filter(|r| r.reviewer == login),
            );
        }, &mut collection)
        .await?;

        collection
            .reviews
            .retain(|review| shifted.contains(review.submitted_at));
        Ok(collection)
    }

    async fn collect_search<F>(
        &self,
        search: &str,
        shifted: &Window,
        mut ingest: F,
        collection: &mut PersonCollection,
    ) -> Result<()>
    where
        F: FnMut(PullRequest, Vec<Review>, Vec<Commit>, &mut PersonCollection),
    {
        let query = search_query();
        let mut cursor: Option<String> = None;

        loop {
            if self.stopped() {
                collection.partial = true;
                collection.failures.push("collection cancelled".to_string());
                return Ok(());
            }

            let variables = json!({
                "query": search,
                "pageSize": self.page_size,
                "cursor": cursor,
            });
            let data = match self.execute(&query, variables).await {
                Ok(data) => data,
                Err(e) if e.is_transient() => {
                    collection.partial = true;
                    collection.failures.push(e.to_string());
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let page: Connection<PrNode> = serde_json::from_value(
                data.get("search").cloned().unwrap_or(Value::Null),
            )
            .map_err(|e| FlowError::UpstreamPermanent(format!("search payload: {e}")))?;

            if page.nodes.is_empty() {
                return Ok(());
            }
            for node in page.nodes {
                // Search results span repositories; the node itself does
                // not carry one in this query, so derive from the org.
                let repo = RepoRef::new(self.organization.clone(), "unknown");
                let (pr, reviews, commits) = wire::convert_pr(node, &repo);
                if shifted.contains(pr.principal_timestamp()) {
                    ingest(pr, reviews, commits, collection);
                }
            }
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(end)) => cursor = Some(end),
                _ => return Ok(()),
            }
        }
    }

    fn ingest_release_page(
        &self,
        page: Connection<ReleaseNode>,
        repo: &RepoRef,
        shifted: &Window,
        collection: &mut RepoCollection,
    ) -> (bool, Option<String>) {
        if page.nodes.is_empty() {
            return (true, None);
        }
        let mut any_in_window = false;
        for node in page.nodes {
            if let Some(release) = wire::convert_release(node, repo, &self.rules) {
                if shifted.contains(release.published_at) {
                    any_in_window = true;
                    collection.releases.push(release);
                }
            }
        }
        let done = !page.page_info.has_next_page || !any_in_window;
        (done, page.page_info.end_cursor)
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send(query, &variables).await {
                Ok(data) => return Ok(data),
                Err(SendFailure::RateLimited(wait)) => {
                    warn!(wait_secs = wait.as_secs(), "rate limited; pausing session");
                    sleep(wait).await;
                    // A pause is not a failed attempt.
                    attempt -= 1;
                }
                Err(SendFailure::Transient(message)) => {
                    if !self.retry.should_retry(attempt) {
                        return Err(FlowError::UpstreamTransient(format!(
                            "{message} (after {attempt} attempts)"
                        )));
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "transient upstream failure; retrying");
                    sleep(delay).await;
                }
                Err(SendFailure::Permanent(message)) => {
                    return Err(FlowError::UpstreamPermanent(message));
                }
            }
        }
    }

    async fn send(&self, query: &str, variables: &Value) -> std::result::Result<Value, SendFailure> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    SendFailure::Transient(format!("request failed: {e}"))
                } else {
                    SendFailure::Permanent(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if let Some(wait) = rate_limit_pause(&response) {
            return Err(SendFailure::RateLimited(wait));
        }
        if status.is_server_error() {
            return Err(SendFailure::Transient(format!("upstream returned {status}")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SendFailure::Permanent(format!("authentication rejected ({status})")));
        }
        if !status.is_success() {
            return Err(SendFailure::Permanent(format!("upstream returned {status}")));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| SendFailure::Transient(format!("body read failed: {e}")))?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(SendFailure::Permanent(format!(
                "query rejected: {}",
                messages.join("; ")
            )));
        }
        body.data
            .ok_or_else(|| SendFailure::Permanent("response carried no data".to_string()))
    }
}

/// Ingest one PR page; returns `(done, next_cursor)`.
fn ingest_pr_page(
    page: Connection<PrNode>,
    repo: &RepoRef,
    shifted: &Window,
    collection: &mut RepoCollection,
) -> (bool, Option<String>) {
    if page.nodes.is_empty() {
        return (true, None);
    }
    // Pages are ordered newest-first; once a whole page predates the
    // window there is nothing further back worth fetching.
    let mut any_recent = false;
    for node in page.nodes {
        let (pr, reviews, commits) = wire::convert_pr(node, repo);
        if pr.created_at >= shifted.since || pr.principal_timestamp() >= shifted.since {
            any_recent = true;
        }
        let merged_in_window = pr.merged_at.is_some_and(|m| shifted.contains(m));
        if merged_in_window {
            collection.reviews.extend(reviews);
            collection.commits.extend(commits);
            collection.prs.push(pr);
        }
    }
    let done = !page.page_info.has_next_page || !any_recent;
    (done, page.page_info.end_cursor)
}

fn rate_limit_pause(response: &reqwest::Response) -> Option<Duration> {
    let headers = response.headers();
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let wait = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Some(Duration::from_secs(wait));
    }
    // Primary budget exhausted: pause until the advertised reset.
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())?;
    if remaining > 0 {
        return None;
    }
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())?;
    let now = Utc::now().timestamp();
    Some(Duration::from_secs(reset.saturating_sub(now).max(1) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn client_with_offset(days: i64) -> Result<SourceHostClient> {
        SourceHostClient::new(
            "https://source.example.com/api/graphql",
            "token",
            "acme",
            days,
            ReleaseRules::default(),
        )
    }

    #[test]
    fn test_negative_offset_rejected() {
        let err = client_with_offset(-1).unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn test_window_shift() {
        let client = client_with_offset(180).unwrap();
        let window = Window::new(ts("2026-07-01T00:00:00Z"), ts("2026-07-31T00:00:00Z"));
        let shifted = client.effective_window(&window);
        assert_eq!(shifted.since, ts("2026-01-02T00:00:00Z"));

        let zero = client_with_offset(0).unwrap();
        assert_eq!(zero.effective_window(&window), window);
    }

    fn pr_node(id: u64, created: &str, merged: Option<&str>) -> PrNode {
        serde_json::from_value(json!({
            "number": id,
            "author": {"login": "alice"},
            "title": "t",
            "createdAt": created,
            "mergedAt": merged,
            "closedAt": merged,
            "merged": merged.is_some(),
            "headRefName": null,
            "commits": null,
            "reviews": null,
        }))
        .unwrap()
    }

    fn page(nodes: Vec<PrNode>, has_next: bool) -> Connection<PrNode> {
        Connection {
            page_info: crate::wire::PageInfo {
                has_next_page: has_next,
                end_cursor: has_next.then(|| "cursor".to_string()),
            },
            nodes,
        }
    }

    #[test]
    fn test_pr_page_keeps_only_merged_in_window() {
        let window = Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"));
        let repo = RepoRef::new("acme", "widgets");
        let mut collection = RepoCollection::default();

        let page = page(
            vec![
                pr_node(1, "2026-03-02T00:00:00Z", Some("2026-03-05T00:00:00Z")),
                pr_node(2, "2026-03-02T00:00:00Z", None),
                pr_node(3, "2026-02-01T00:00:00Z", Some("2026-02-10T00:00:00Z")),
            ],
            true,
        );
        let (done, cursor) = ingest_pr_page(page, &repo, &window, &mut collection);

        assert_eq!(collection.prs.len(), 1);
        assert_eq!(collection.prs[0].id, 1);
        assert!(!done, "a page with in-window rows continues traversal");
        assert_eq!(cursor.as_deref(), Some("cursor"));
    }

    #[test]
    fn test_fully_out_of_window_page_terminates() {
        let window = Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"));
        let repo = RepoRef::new("acme", "widgets");
        let mut collection = RepoCollection::default();

        let stale = page(
            vec![pr_node(9, "2025-12-01T00:00:00Z", Some("2025-12-02T00:00:00Z"))],
            true,
        );
        let (done, _) = ingest_pr_page(stale, &repo, &window, &mut collection);
        assert!(done);
        assert!(collection.prs.is_empty());
    }

    #[test]
    fn test_empty_page_terminates() {
        let window = Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"));
        let mut collection = RepoCollection::default();
        let (done, cursor) = ingest_pr_page(
            page(vec![], true),
            &RepoRef::new("acme", "widgets"),
            &window,
            &mut collection,
        );
        assert!(done);
        assert!(cursor.is_none());
    }
}
