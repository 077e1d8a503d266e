//! The authenticated tracker session.

use crate::pagination::{PaginationPlan, PaginationSettings};
use crate::wire::{self, FilterBean, SearchResponse, VersionBean};
use base64::Engine;
use flowmetric_error::{FlowError, Result};
use flowmetric_types::{FixVersion, Issue, Window};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const COUNT_TIMEOUT: Duration = Duration::from_secs(15);

/// A saved tracker filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Filter id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// The filter's JQL, when the listing endpoint returned it.
    pub jql: Option<String>,
}

/// Result of a JQL search.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Collected issues (all pages that succeeded).
    pub issues: Vec<Issue>,
    /// Total reported by the upstream.
    pub total: u64,
    /// One or more batches failed after all retries.
    pub partial: bool,
    /// Whether changelogs were expanded.
    pub changelog_expanded: bool,
    /// Status-at-time answers must be reconstructed from current status.
    pub approximated: bool,
    /// Data requests actually issued (count query excluded).
    pub data_requests: u32,
}

enum SendFailure {
    Transient(String),
    Permanent(String),
}

/// One authenticated session against the tracker REST API.
#[derive(Debug)]
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    time_offset_days: u32,
    settings: PaginationSettings,
    stop: Arc<AtomicBool>,
}

impl TrackerClient {
    /// Build a session. Credentials go into an HTTP Basic header.
    ///
    /// # Errors
    ///
    /// `ConfigError` for a negative time offset or an unbuildable HTTP
    /// client.
    pub fn new(
        base_url: impl Into<String>,
        username: &str,
        api_token: &str,
        verify_ssl: bool,
        time_offset_days: i64,
        settings: PaginationSettings,
    ) -> Result<Self> {
        if time_offset_days < 0 {
            return Err(FlowError::Config(format!(
                "timeOffsetDays must be >= 0, got {time_offset_days}"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify_ssl)
            .user_agent(concat!("flowmetric/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FlowError::Config(format!("http client: {e}")))?;

        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{api_token}"));

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization: format!("Basic {credentials}"),
            time_offset_days: time_offset_days as u32,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a cooperative stop flag; checked at every batch boundary.
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

    /// Inexpensive count of a JQL result set.
    ///
    /// # Errors
    ///
    /// `UpstreamTransient` on timeout/5xx (the caller falls back to the
    /// huge plan), `UpstreamPermanent` on auth or malformed JQL.
    pub async fn count(&self, jql: &str) -> Result<u64> {
        let body = json!({ "jql": jql, "maxResults": 0, "fields": ["key"] });
        let response = self
            .send_once("/rest/api/2/search", &body, COUNT_TIMEOUT)
            .await
            .map_err(|failure| match failure {
                SendFailure::Transient(m) => FlowError::UpstreamTransient(m),
                SendFailure::Permanent(m) => FlowError::UpstreamPermanent(m),
            })?;
        let parsed: SearchResponse = serde_json::from_value(response)
            .map_err(|e| FlowError::UpstreamPermanent(format!("count payload: {e}")))?;
        Ok(parsed.total)
    }

    /// Run a JQL search with the adaptive strategy.
    ///
    /// # Errors
    ///
    /// `UpstreamPermanent` on auth or malformed-JQL failures. Transient
    /// exhaustion never errors: the outcome carries the collected rows
    /// with `partial = true`.
    pub async fn search(&self, jql: &str) -> Result<SearchOutcome> {
        let plan = match self.count(jql).await {
            Ok(n) if n == 0 => {
                // Nothing to fetch; no data query is issued.
                return Ok(SearchOutcome {
                    changelog_expanded: true,
                    ..SearchOutcome::default()
                });
            }
            Ok(n) => {
                debug!(jql, total = n, "count query answered");
                PaginationPlan::for_count(n, &self.settings)
            }
            Err(e) if e.is_transient() => {
                warn!(jql, error = %e, "count unavailable");
                PaginationPlan::count_unavailable(&self.settings)
            }
            Err(e) => return Err(e),
        };
        self.fetch_batches(jql, &plan).await
    }

    /// Search with the window shifted by the configured offset and
    /// bound into the JQL; results are post-filtered by creation time
    /// against the shifted window.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::search`].
    pub async fn search_in_window(&self, jql: &str, window: &Window) -> Result<SearchOutcome> {
        let shifted = window.shifted_back(self.time_offset_days);
        let bounded = format!(
            "({jql}) AND created >= \"{}\" AND created < \"{}\"",
            shifted.since.format("%Y-%m-%d %H:%M"),
            shifted.until.format("%Y-%m-%d %H:%M"),
        );
        let mut outcome = self.search(&bounded).await?;
        outcome
            .issues
            .retain(|issue| shifted.contains(issue.created_at));
        Ok(outcome)
    }

    async fn fetch_batches(&self, jql: &str, plan: &PaginationPlan) -> Result<SearchOutcome> {
        let mut outcome = SearchOutcome {
            changelog_expanded: plan.fetch_changelog,
            approximated: plan.approximated,
            ..SearchOutcome::default()
        };

        let mut start_at: u64 = 0;
        loop {
            if self.stopped() {
                outcome.partial = true;
                break;
            }

            let body = json!({
                "jql": jql,
                "startAt": start_at,
                "maxResults": plan.batch_size,
                "expand": if plan.fetch_changelog { json!(["changelog"]) } else { json!([]) },
            });

            let page = match self.send_with_retry("/rest/api/2/search", &body).await {
                Ok(value) => value,
                Err(FlowError::UpstreamTransient(message)) => {
                    warn!(jql, start_at, error = %message, "batch failed after retries; returning partial result");
                    outcome.partial = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            outcome.data_requests += 1;

            let parsed: SearchResponse = serde_json::from_value(page)
                .map_err(|e| FlowError::UpstreamPermanent(format!("search payload: {e}")))?;
            outcome.total = parsed.total;

            let batch_len = parsed.issues.len() as u64;
            if batch_len == 0 {
                break;
            }
            outcome
                .issues
                .extend(parsed.issues.into_iter().filter_map(wire::convert_issue));

            start_at += batch_len;
            if plan.single_request || start_at >= parsed.total {
                break;
            }
        }
        Ok(outcome)
    }

    /// Filters owned by (or visible to) the authenticated user.
    ///
    /// # Errors
    ///
    /// Standard send contract; filters are small, one request.
    pub async fn list_user_filters(&self) -> Result<Vec<Filter>> {
        let value = self
            .get_with_retry("/rest/api/2/filter/favourite")
            .await?;
        let beans: Vec<FilterBean> = serde_json::from_value(value)
            .map_err(|e| FlowError::UpstreamPermanent(format!("filter payload: {e}")))?;
        Ok(beans.into_iter().filter_map(convert_filter).collect())
    }

    /// Search filters by name fragment.
    ///
    /// # Errors
    ///
    /// Standard send contract.
    pub async fn search_filters(&self, term: &str) -> Result<Vec<Filter>> {
        let path = format!(
            "/rest/api/2/filter/search?filterName={}",
            urlencode(term)
        );
        let value = self.get_with_retry(&path).await?;
        // The search endpoint wraps results in a `values` page.
        let beans: Vec<FilterBean> = serde_json::from_value(
            value.get("values").cloned().unwrap_or(json!([])),
        )
        .map_err(|e| FlowError::UpstreamPermanent(format!("filter payload: {e}")))?;
        Ok(beans.into_iter().filter_map(convert_filter).collect())
    }

    /// Resolve a filter id to its JQL.
    ///
    /// # Errors
    ///
    /// `NotFound` when the filter has no JQL; standard send contract
    /// otherwise.
    pub async fn get_filter_jql(&self, id: u64) -> Result<String> {
        let value = self.get_with_retry(&format!("/rest/api/2/filter/{id}")).await?;
        let bean: FilterBean = serde_json::from_value(value)
            .map_err(|e| FlowError::UpstreamPermanent(format!("filter payload: {e}")))?;
        bean.jql
            .ok_or_else(|| FlowError::NotFound(format!("filter {id} has no JQL")))
    }

    /// Enumerate a project's fix-versions and, for released versions,
    /// the contributing issues (restricted to `team_members` when
    /// non-empty).
    ///
    /// # Errors
    ///
    /// Standard send contract.
    pub async fn collect_releases(
        &self,
        project_key: &str,
        team_members: &[String],
    ) -> Result<Vec<FixVersion>> {
        let value = self
            .get_with_retry(&format!("/rest/api/2/project/{project_key}/versions"))
            .await?;
        let beans: Vec<VersionBean> = serde_json::from_value(value)
            .map_err(|e| FlowError::UpstreamPermanent(format!("version payload: {e}")))?;

        let mut versions = Vec::with_capacity(beans.len());
        for bean in beans {
            let issue_keys = if bean.released {
                let mut jql = format!(
                    "project = \"{project_key}\" AND fixVersion = \"{}\"",
                    bean.name
                );
                if !team_members.is_empty() {
                    let members: Vec<String> =
                        team_members.iter().map(|m| format!("\"{m}\"")).collect();
                    jql.push_str(&format!(" AND assignee in ({})", members.join(", ")));
                }
                let outcome = self.search(&jql).await?;
                outcome.issues.into_iter().map(|issue| issue.key).collect()
            } else {
                Vec::new()
            };
            versions.push(wire::convert_version(bean, issue_keys));
        }
        Ok(versions)
    }

    async fn send_with_retry(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(path, body, REQUEST_TIMEOUT).await {
                Ok(value) => return Ok(value),
                Err(SendFailure::Transient(message)) => {
                    if attempt >= self.settings.max_retries {
                        return Err(FlowError::UpstreamTransient(format!(
                            "{message} (after {attempt} attempts)"
                        )));
                    }
                    let delay = self.settings.backoff(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "transient tracker failure; retrying");
                    sleep(delay).await;
                }
                Err(SendFailure::Permanent(message)) => {
                    return Err(FlowError::UpstreamPermanent(message));
                }
            }
        }
    }

    async fn get_with_retry(&self, path: &str) -> Result<serde_json::Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(path).await {
                Ok(value) => return Ok(value),
                Err(SendFailure::Transient(message)) => {
                    if attempt >= self.settings.max_retries {
                        return Err(FlowError::UpstreamTransient(format!(
                            "{message} (after {attempt} attempts)"
                        )));
                    }
                    sleep(self.settings.backoff(attempt)).await;
                }
                Err(SendFailure::Permanent(message)) => {
                    return Err(FlowError::UpstreamPermanent(message));
                }
            }
        }
    }

    async fn send_once(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, SendFailure> {
        let request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .timeout(timeout)
            .json(body);
        Self::classify(request.send().await).await
    }

    async fn get_once(&self, path: &str) -> std::result::Result<serde_json::Value, SendFailure> {
        let request = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.authorization);
        Self::classify(request.send().await).await
    }

    async fn classify(
        sent: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> std::result::Result<serde_json::Value, SendFailure> {
        let response = sent.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SendFailure::Transient(format!("request failed: {e}"))
            } else {
                SendFailure::Permanent(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        // Gateway timeouts and server errors are transient.
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SendFailure::Transient(format!("tracker returned {status}")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SendFailure::Permanent(format!("authentication rejected ({status})")));
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(SendFailure::Permanent("malformed JQL".to_string()));
        }
        if !status.is_success() {
            return Err(SendFailure::Permanent(format!("tracker returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| SendFailure::Transient(format!("body read failed: {e}")))
    }
}

fn convert_filter(bean: FilterBean) -> Option<Filter> {
    Some(Filter {
        id: bean.id.parse().ok()?,
        name: bean.name,
        jql: bean.jql,
    })
}

fn urlencode(raw: &str) -> String {
    raw.chars()
        .flat_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                vec![c]
            } else {
                format!("%{:02X}", c as u32).chars().collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PaginationSettings {
        PaginationSettings {
            enabled: true,
            batch_size: 50,
            huge_threshold: 150,
            large_batch_size: 1000,
            fetch_changelog_for_large: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    fn client() -> TrackerClient {
        TrackerClient::new(
            "https://tracker.example.com/",
            "svc",
            "token",
            true,
            0,
            settings(),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = client();
        assert_eq!(client.base_url, "https://tracker.example.com");
    }

    #[test]
    fn test_negative_offset_rejected() {
        let err = TrackerClient::new("https://t", "u", "t", true, -1, settings()).unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn test_basic_auth_header_shape() {
        let client = client();
        assert!(client.authorization.starts_with("Basic "));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(client.authorization.trim_start_matches("Basic "))
            .unwrap();
        assert_eq!(decoded, b"svc:token");
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("team board"), "team%20board");
        assert_eq!(urlencode("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[test]
    fn test_convert_filter_requires_numeric_id() {
        assert!(convert_filter(FilterBean {
            id: "123".to_string(),
            name: "board".to_string(),
            jql: None
        })
        .is_some());
        assert!(convert_filter(FilterBean {
            id: "abc".to_string(),
            name: "board".to_string(),
            jql: None
        })
        .is_none());
    }
}
