//! Declarative configuration, loaded once at startup.
//!
//! The schema mirrors the dashboard's TOML file: camelCase keys, nested
//! sections per subsystem. `load()` deserializes and then runs an
//! explicit `validate()` pass — partial or invalid configuration aborts
//! startup with `ConfigError`; nothing is silently coerced.

mod schema;

pub use schema::{
    AppConfig, AuthConfig, CacheSettings, DashboardConfig, EnvironmentConfig, EvictionPolicyKind,
    EventsSettings, IncidentConfig, IssueTrackerConfig, MemberConfig, PaginationConfig,
    PerfTrackerConfig, RateLimitingConfig, ReleasesConfig, ResolvedEnvironment, ScoringConfig,
    SourceHostConfig, TeamConfig, UserConfig, DEFAULT_ENVIRONMENT,
};

use flowmetric_error::{FlowError, Result};
use std::path::Path;

/// Load and validate configuration from a TOML file.
///
/// # Errors
///
/// `ConfigError` when the file is unreadable, fails to parse, or fails
/// the validation pass.
pub fn load(path: &Path) -> Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| FlowError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw)
}

/// Parse and validate configuration from a TOML string.
///
/// # Errors
///
/// `ConfigError` on parse or validation failure.
pub fn parse(raw: &str) -> Result<AppConfig> {
    let config: AppConfig =
        toml::from_str(raw).map_err(|e| FlowError::Config(format!("parse failure: {e}")))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [sourceHost]
        token = "token"
        organization = "acme"
        baseUrl = "https://source.example.com/api/graphql"

        [issueTracker]
        server = "https://tracker.example.com"
        username = "svc-metrics"
        apiToken = "secret"
        projectKeys = ["PROJ"]

        [issueTracker.pagination]
        hugeThreshold = 150

        [[teams]]
        name = "platform"
        repositories = ["acme/widgets"]

        [[teams.members]]
        name = "Alice"
        sourceLogin = "alice"
        issueTrackerLogin = "alice@example.com"
    "#;

    #[test]
    fn test_minimal_config_parses() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.source_host.organization, "acme");
        assert_eq!(config.issue_tracker.pagination.huge_threshold, 150);
        assert_eq!(config.teams.len(), 1);
        assert_eq!(config.teams[0].members[0].source_login, "alice");
        // Ambient defaults.
        assert_eq!(config.dashboard.port, 8080);
        assert!(config.dashboard.rate_limiting.enabled);
    }

    #[test]
    fn test_huge_threshold_is_required() {
        let without = MINIMAL.replace("hugeThreshold = 150", "");
        let err = parse(&without).unwrap_err();
        assert!(err.to_string().contains("hugeThreshold"), "{err}");
    }

    #[test]
    fn test_negative_time_offset_rejected() {
        let raw = format!(
            "{MINIMAL}\n[issueTracker.environments.uat]\ntimeOffsetDays = -5\n"
        );
        let err = parse(&raw).unwrap_err();
        assert!(err.to_string().contains("timeOffsetDays"), "{err}");
    }

    #[test]
    fn test_weight_sum_rejected_outside_tolerance() {
        let raw = format!(
            "{MINIMAL}\n[performanceWeights]\nprs = 0.18\nreviews = 0.15\ncommits = 0.1\ncycleTime = 0.1\njiraCompleted = 0.15\nmergeRate = 0.05\ndeploymentFrequency = 0.08\nleadTime = 0.07\nchangeFailureRate = 0.05\nmttr = 0.05\n"
        );
        let err = parse(&raw).unwrap_err();
        assert!(err.to_string().contains("sum"), "{err}");
    }

    #[test]
    fn test_auth_requires_strong_hash() {
        let raw = format!(
            "{MINIMAL}\n[dashboard.auth]\nenabled = true\n[[dashboard.auth.users]]\nusername = \"ops\"\npasswordHashPbkdf2Sha256 = \"pbkdf2-sha256$1000$c2FsdA$aGFzaA\"\n"
        );
        let err = parse(&raw).unwrap_err();
        assert!(err.to_string().contains("600000"), "{err}");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowmetric.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.teams[0].name, "platform");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/flowmetric.toml")).unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }
}
