//! Configuration schema.

use flowmetric_error::{FlowError, Result};
use flowmetric_types::{PerformanceWeights, ReleaseRules};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment name that produces no cache-file suffix.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Minimum PBKDF2 iteration count accepted for stored password hashes.
const MIN_PBKDF2_ITERATIONS: u32 = 600_000;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Source-host credentials and endpoint.
    pub source_host: SourceHostConfig,
    /// Issue-tracker credentials, environments and pagination strategy.
    pub issue_tracker: IssueTrackerConfig,
    /// Fan-out plan: team → members, team → repositories.
    pub teams: Vec<TeamConfig>,
    /// HTTP server settings.
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Performance-score weights.
    #[serde(default)]
    pub performance_weights: PerformanceWeights,
    /// Scoring switches.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Cache tuning.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Release environment classification rules.
    #[serde(default)]
    pub releases: ReleasesConfig,
    /// Incident attribution rules for change-failure-rate and MTTR.
    #[serde(default)]
    pub incidents: IncidentConfig,
    /// Route-timing store settings.
    #[serde(default)]
    pub performance_tracker: PerfTrackerConfig,
    /// Event-bus introspection settings.
    #[serde(default)]
    pub events: EventsSettings,
}

impl AppConfig {
    /// Full validation pass; collects nothing — fails on the first
    /// violation so startup aborts with a precise message.
    ///
    /// # Errors
    ///
    /// `ConfigError` describing the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.teams.is_empty() {
            return Err(FlowError::Config("at least one team must be configured".into()));
        }
        for team in &self.teams {
            if team.name.trim().is_empty() {
                return Err(FlowError::Config("team name must not be empty".into()));
            }
        }

        for (name, env) in &self.issue_tracker.environments {
            if env.time_offset_days < 0 {
                return Err(FlowError::Config(format!(
                    "issueTracker.environments.{name}.timeOffsetDays must be >= 0, got {}",
                    env.time_offset_days
                )));
            }
        }

        let pagination = &self.issue_tracker.pagination;
        if pagination.batch_size == 0 {
            return Err(FlowError::Config(
                "issueTracker.pagination.batchSize must be > 0".into(),
            ));
        }
        if pagination.huge_threshold == 0 {
            return Err(FlowError::Config(
                "issueTracker.pagination.hugeThreshold must be > 0".into(),
            ));
        }

        self.performance_weights
            .validate()
            .map_err(|e| FlowError::Config(format!("performanceWeights: {e}")))?;

        // Compile once here so bad patterns abort startup, not a job.
        self.releases.compile()?;

        if self.incidents.blast_radius_hours <= 0.0 {
            return Err(FlowError::Config(
                "incidents.blastRadiusHours must be positive".into(),
            ));
        }

        if self.dashboard.auth.enabled {
            if self.dashboard.auth.users.is_empty() {
                return Err(FlowError::Config(
                    "dashboard.auth.enabled requires at least one user".into(),
                ));
            }
            for user in &self.dashboard.auth.users {
                validate_password_hash(&user.username, &user.password_hash_pbkdf2_sha256)?;
            }
        }

        if self.cache.memory_max_bytes == 0 {
            return Err(FlowError::Config("cache.memoryMaxBytes must be > 0".into()));
        }

        Ok(())
    }

    /// Resolve an environment by name.
    ///
    /// The `default` environment always resolves (base tracker server,
    /// offset 0); any other name must be declared.
    ///
    /// # Errors
    ///
    /// `NotFound` for an undeclared non-default environment.
    pub fn environment(&self, name: &str) -> Result<ResolvedEnvironment> {
        if let Some(env) = self.issue_tracker.environments.get(name) {
            return Ok(ResolvedEnvironment {
                name: name.to_string(),
                server: env
                    .server
                    .clone()
                    .unwrap_or_else(|| self.issue_tracker.server.clone()),
                time_offset_days: env.time_offset_days as u32,
                filter_ids: env.filter_ids.clone(),
            });
        }
        if name == DEFAULT_ENVIRONMENT {
            return Ok(ResolvedEnvironment {
                name: name.to_string(),
                server: self.issue_tracker.server.clone(),
                time_offset_days: 0,
                filter_ids: Vec::new(),
            });
        }
        Err(FlowError::NotFound(format!("environment {name:?} is not configured")))
    }

    /// Team lookup by name.
    #[must_use]
    pub fn team(&self, name: &str) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.name == name)
    }
}

/// A declared environment resolved against base tracker settings.
#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    /// Environment name.
    pub name: String,
    /// Tracker server for this environment.
    pub server: String,
    /// Days both upstream windows are shifted back.
    pub time_offset_days: u32,
    /// Tracker filter ids collected for this environment.
    pub filter_ids: Vec<u64>,
}

/// Source-host credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHostConfig {
    /// API token.
    pub token: String,
    /// Organization whose repositories are collected.
    pub organization: String,
    /// GraphQL endpoint URL.
    pub base_url: String,
}

/// Issue-tracker credentials and strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTrackerConfig {
    /// Base server URL.
    pub server: String,
    /// API username.
    pub username: String,
    /// API token.
    pub api_token: String,
    /// Project keys in scope.
    #[serde(default)]
    pub project_keys: Vec<String>,
    /// TLS certificate verification.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Named environments (`default` is implicit when absent).
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    /// Adaptive pagination strategy.
    pub pagination: PaginationConfig,
}

/// One tracker environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Server override; base server when absent.
    #[serde(default)]
    pub server: Option<String>,
    /// Days both upstream clients shift their windows back. Must be
    /// non-negative.
    #[serde(default)]
    pub time_offset_days: i64,
    /// Filter ids collected for this environment.
    #[serde(default)]
    pub filter_ids: Vec<u64>,
}

/// Adaptive pagination strategy (C2). `hugeThreshold` deliberately has
/// no default: operational and light deployments disagree on it, so the
/// operator must choose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationConfig {
    /// Master switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Normal batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Result-set size at or above which the huge strategy applies.
    pub huge_threshold: u32,
    /// Large batch size used above the threshold.
    #[serde(default = "default_large_batch")]
    pub large_batch_size: u32,
    /// Whether to expand changelogs even above the threshold.
    #[serde(default)]
    pub fetch_changelog_for_large: bool,
    /// Per-batch retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay; doubles per attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

/// One team in the fan-out plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    /// Team name (also a URL path segment; validated at the edge).
    pub name: String,
    /// Members.
    #[serde(default)]
    pub members: Vec<MemberConfig>,
    /// Repositories as `owner/name`.
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// One team member with per-service logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    /// Display name.
    pub name: String,
    /// Source-host login.
    pub source_login: String,
    /// Issue-tracker login.
    pub issue_tracker_login: String,
}

/// Dashboard HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Debug logging and error detail.
    #[serde(default)]
    pub debug: bool,
    /// Emit Strict-Transport-Security.
    #[serde(default)]
    pub enable_hsts: bool,
    /// Refuse (404) requests whose artifact is partial, instead of
    /// serving with `status: "partial"`.
    #[serde(default)]
    pub refuse_partial: bool,
    /// Optional HTTP Basic auth.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate-limiting middleware.
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            debug: false,
            enable_hsts: false,
            refuse_partial: false,
            auth: AuthConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
        }
    }
}

/// HTTP Basic auth settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Accounts.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// One dashboard account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// Username.
    pub username: String,
    /// `pbkdf2-sha256$<iterations>$<salt-b64>$<digest-b64>`.
    pub password_hash_pbkdf2_sha256: String,
}

/// Rate-limiting middleware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingConfig {
    /// Master switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per minute per client.
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,
    /// Backing-store URI for shared limiter state; in-process when
    /// absent.
    #[serde(default)]
    pub storage_uri: Option<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: default_rate_limit(),
            storage_uri: None,
        }
    }
}

/// Cache tuning (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// Memory-tier size ceiling in bytes.
    #[serde(default = "default_memory_max_bytes")]
    pub memory_max_bytes: u64,
    /// TTL for the ttl eviction policy.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Which eviction policy guards the memory tier.
    #[serde(default)]
    pub eviction_policy: EvictionPolicyKind,
    /// Directory holding disk artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Disk-tier ceiling: number of kept artifacts, oldest pruned.
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,
    /// Keys pre-loaded into memory on startup or on demand, as
    /// `rangeSpec` or `rangeSpec:environment`.
    #[serde(default)]
    pub warm_keys: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_max_bytes: default_memory_max_bytes(),
            ttl_seconds: default_ttl_seconds(),
            eviction_policy: EvictionPolicyKind::default(),
            artifact_dir: default_artifact_dir(),
            max_artifacts: default_max_artifacts(),
            warm_keys: Vec::new(),
        }
    }
}

/// Selectable eviction policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    /// Size-capped least-recently-used.
    #[default]
    Lru,
    /// Age-based expiry plus the LRU size cap.
    Ttl,
}

/// Release classification rule lists. Deployment-specific; nothing is
/// hard-coded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasesConfig {
    /// Patterns marking a release as production.
    #[serde(default)]
    pub production_patterns: Vec<String>,
    /// Patterns marking a release as staging.
    #[serde(default)]
    pub staging_patterns: Vec<String>,
}

impl ReleasesConfig {
    /// Compile into matchable rules.
    ///
    /// # Errors
    ///
    /// `ConfigError` for the first invalid pattern.
    pub fn compile(&self) -> Result<ReleaseRules> {
        ReleaseRules::compile(&self.production_patterns, &self.staging_patterns)
            .map_err(|e| FlowError::Config(format!("releases: {e}")))
    }
}

/// Incident attribution rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentConfig {
    /// Issue types counting as incidents.
    #[serde(default = "default_incident_types")]
    pub issue_types: Vec<String>,
    /// Labels counting as incidents (any match qualifies).
    #[serde(default)]
    pub labels: Vec<String>,
    /// Hours after a release during which a new incident marks it
    /// failed.
    #[serde(default = "default_blast_radius")]
    pub blast_radius_hours: f64,
    /// Widen the attribution window to the next production release.
    #[serde(default)]
    pub extend_to_next_release: bool,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            issue_types: default_incident_types(),
            labels: Vec::new(),
            blast_radius_hours: default_blast_radius(),
            extend_to_next_release: false,
        }
    }
}

/// Route-timing store settings (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfTrackerConfig {
    /// SQLite database path.
    #[serde(default = "default_perf_db")]
    pub db_path: PathBuf,
    /// Rows older than this are deleted by rotation.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for PerfTrackerConfig {
    fn default() -> Self {
        Self {
            db_path: default_perf_db(),
            retention_days: default_retention_days(),
        }
    }
}

/// Scoring switches (C5).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringConfig {
    /// Divide volume-like dimensions by team size before peer
    /// normalization.
    #[serde(default)]
    pub normalize_by_team_size: bool,
}

/// Event-bus introspection settings (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsSettings {
    /// Events retained for introspection.
    #[serde(default = "default_event_retention")]
    pub retention: usize,
}

impl Default for EventsSettings {
    fn default() -> Self {
        Self {
            retention: default_event_retention(),
        }
    }
}

fn validate_password_hash(username: &str, hash: &str) -> Result<()> {
    let mut parts = hash.split('$');
    let scheme = parts.next().unwrap_or_default();
    let iterations = parts.next().unwrap_or_default();
    let has_salt = parts.next().is_some_and(|s| !s.is_empty());
    let has_digest = parts.next().is_some_and(|s| !s.is_empty());

    if scheme != "pbkdf2-sha256" || !has_salt || !has_digest {
        return Err(FlowError::Config(format!(
            "dashboard.auth user {username:?}: password hash must be pbkdf2-sha256$iters$salt$digest"
        )));
    }
    let iterations: u32 = iterations.parse().map_err(|_| {
        FlowError::Config(format!(
            "dashboard.auth user {username:?}: invalid iteration count"
        ))
    })?;
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(FlowError::Config(format!(
            "dashboard.auth user {username:?}: PBKDF2 iterations {iterations} below required {MIN_PBKDF2_ITERATIONS}"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u32 {
    50
}

fn default_large_batch() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u32 {
    120
}

fn default_memory_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_max_artifacts() -> usize {
    30
}

fn default_incident_types() -> Vec<String> {
    vec!["Incident".to_string()]
}

fn default_blast_radius() -> f64 {
    24.0
}

fn default_perf_db() -> PathBuf {
    PathBuf::from("performance.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_event_retention() -> usize {
    100
}
