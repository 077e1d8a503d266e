//! Tracker REST wire types.

use chrono::{DateTime, Utc};
use flowmetric_types::{FixVersion, Issue, IssueTransition};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub issues: Vec<IssueBean>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueBean {
    pub key: String,
    pub fields: IssueFields,
    #[serde(default)]
    pub changelog: Option<Changelog>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueFields {
    #[serde(default)]
    pub issuetype: Option<Named>,
    #[serde(default)]
    pub status: Option<Named>,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub reporter: Option<User>,
    pub created: String,
    #[serde(default)]
    pub resolutiondate: Option<String>,
    #[serde(rename = "fixVersions", default)]
    pub fix_versions: Vec<Named>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<Named>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Named {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
}

impl User {
    fn login(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.email_address.clone())
            .or_else(|| self.display_name.clone())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Changelog {
    #[serde(default)]
    pub histories: Vec<History>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct History {
    pub created: String,
    #[serde(default)]
    pub items: Vec<HistoryItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryItem {
    pub field: String,
    #[serde(rename = "fromString", default)]
    pub from_string: Option<String>,
    #[serde(rename = "toString", default)]
    pub to_string: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FilterBean {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub jql: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionBean {
    pub name: String,
    #[serde(default)]
    pub released: bool,
    #[serde(rename = "releaseDate", default)]
    pub release_date: Option<String>,
}

/// The tracker emits `2026-03-01T12:00:00.000+0000`; accept RFC 3339 as
/// well.
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Date-only release dates resolve to midnight UTC.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_datetime(raw).or_else(|| {
        raw.parse::<chrono::NaiveDate>()
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
    })
}

pub(crate) fn convert_issue(bean: IssueBean) -> Option<Issue> {
    let created_at = parse_datetime(&bean.fields.created)?;
    let mut transitions: Vec<IssueTransition> = bean
        .changelog
        .iter()
        .flat_map(|log| log.histories.iter())
        .filter_map(|history| {
            let at = parse_datetime(&history.created)?;
            history
                .items
                .iter()
                .find(|item| item.field == "status")
                .map(|item| IssueTransition {
                    from: item.from_string.clone().unwrap_or_default(),
                    to: item.to_string.clone().unwrap_or_default(),
                    at,
                })
        })
        .collect();
    transitions.sort_by_key(|t| t.at);

    Some(Issue {
        key: bean.key,
        issue_type: bean
            .fields
            .issuetype
            .map(|t| t.name)
            .unwrap_or_else(|| "Unknown".to_string()),
        status: bean
            .fields
            .status
            .map(|s| s.name)
            .unwrap_or_else(|| "Unknown".to_string()),
        assignee: bean.fields.assignee.and_then(|u| u.login()),
        reporter: bean.fields.reporter.and_then(|u| u.login()),
        created_at,
        resolved_at: bean
            .fields
            .resolutiondate
            .as_deref()
            .and_then(parse_datetime),
        transitions,
        fix_versions: bean.fields.fix_versions.into_iter().map(|v| v.name).collect(),
        labels: bean.fields.labels,
        priority: bean.fields.priority.map(|p| p.name),
    })
}

pub(crate) fn convert_version(bean: VersionBean, issue_keys: Vec<String>) -> FixVersion {
    FixVersion {
        name: bean.name,
        released: bean.released,
        release_date: bean.release_date.as_deref().and_then(parse_date),
        issue_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tracker_datetime_formats() {
        assert!(parse_datetime("2026-03-01T12:00:00.000+0000").is_some());
        assert!(parse_datetime("2026-03-01T12:00:00Z").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn test_parse_date_only() {
        let t = parse_date("2026-03-01").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_convert_issue_with_changelog() {
        let bean: IssueBean = serde_json::from_str(
            r#"{
                "key": "PROJ-7",
                "fields": {
                    "issuetype": {"name": "Bug"},
                    "status": {"name": "Done"},
                    "assignee": {"name": "alice"},
                    "reporter": {"emailAddress": "bob@example.com"},
                    "created": "2026-03-01T09:00:00.000+0000",
                    "resolutiondate": "2026-03-03T10:00:00.000+0000",
                    "fixVersions": [{"name": "v1.2.3"}],
                    "labels": ["backend"],
                    "priority": {"name": "High"}
                },
                "changelog": {
                    "histories": [
                        {"created": "2026-03-02T00:00:00.000+0000",
                         "items": [{"field": "status", "fromString": "To Do", "toString": "In Progress"},
                                   {"field": "assignee", "fromString": null, "toString": "alice"}]},
                        {"created": "2026-03-01T12:00:00.000+0000",
                         "items": [{"field": "labels", "fromString": "", "toString": "backend"}]}
                    ]
                }
            }"#,
        )
        .unwrap();

        let issue = convert_issue(bean).unwrap();
        assert_eq!(issue.key, "PROJ-7");
        assert_eq!(issue.issue_type, "Bug");
        assert_eq!(issue.assignee.as_deref(), Some("alice"));
        assert_eq!(issue.reporter.as_deref(), Some("bob@example.com"));
        assert_eq!(issue.fix_versions, vec!["v1.2.3".to_string()]);
        // Only status items become transitions; non-status history rows
        // are ignored.
        assert_eq!(issue.transitions.len(), 1);
        assert_eq!(issue.transitions[0].to, "In Progress");
        assert!(issue.resolved_at.is_some());
    }

    #[test]
    fn test_convert_issue_without_changelog() {
        let bean: IssueBean = serde_json::from_str(
            r#"{"key": "PROJ-9", "fields": {"created": "2026-03-01T09:00:00.000+0000"}}"#,
        )
        .unwrap();
        let issue = convert_issue(bean).unwrap();
        assert!(issue.transitions.is_empty());
        assert_eq!(issue.status, "Unknown");
    }

    #[test]
    fn test_convert_version() {
        let bean: VersionBean = serde_json::from_str(
            r#"{"name": "v2.0", "released": true, "releaseDate": "2026-03-01"}"#,
        )
        .unwrap();
        let version = convert_version(bean, vec!["PROJ-1".to_string()]);
        assert!(version.released);
        assert_eq!(version.issue_keys, vec!["PROJ-1".to_string()]);
        assert!(version.release_date.is_some());
    }
}
