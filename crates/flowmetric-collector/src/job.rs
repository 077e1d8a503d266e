//! The collection job: collect → compute → persist → announce.

use crate::adapters::{IssueSource, RepoSource};
use crate::orchestrator::{CollectionOutcome, Collector, PoolSizes, TeamPlan};
use chrono::Utc;
use flowmetric_cache::{ArtifactHeader, CacheKey, MetricsCache};
use flowmetric_config::AppConfig;
use flowmetric_error::Result;
use flowmetric_events::{Event, EventBus, EventType};
use flowmetric_metrics::{apply_scores, comparison_rows, MetricsKernel};
use flowmetric_sourcehost::SourceHostClient;
use flowmetric_tracker::{PaginationSettings, TrackerClient};
use flowmetric_types::{MetricsBundle, MetricsMetadata, RangeSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Summary returned to the caller (and the refresh endpoint).
#[derive(Debug)]
pub struct JobOutcome {
    /// Where the artifact landed.
    pub artifact_path: PathBuf,
    /// Whether any unit was partial or failed.
    pub partial: bool,
    /// Teams collected.
    pub teams: usize,
    /// Contributors collected.
    pub persons: usize,
}

/// Run one collection job for `(range, environment)`.
///
/// Builds one session per upstream client (shared by all workers),
/// fans out, computes the full metric bundle, persists the artifact
/// (fsynced before the event), and publishes `DATA_COLLECTED`.
///
/// # Errors
///
/// `ConfigError` for an unresolvable environment, upstream permanent
/// errors that prevented any collection, or artifact I/O failures.
pub async fn run_collection_job(
    config: &AppConfig,
    range: RangeSpec,
    environment: &str,
    cache: &MetricsCache,
    bus: &EventBus,
) -> Result<JobOutcome> {
    let env = config.environment(environment)?;
    let stop = Arc::new(AtomicBool::new(false));

    let rules = config.releases.compile()?;
    let source = SourceHostClient::new(
        config.source_host.base_url.clone(),
        config.source_host.token.clone(),
        config.source_host.organization.clone(),
        i64::from(env.time_offset_days),
        rules,
    )?
    .with_stop_flag(Arc::clone(&stop));

    let pagination = &config.issue_tracker.pagination;
    let tracker = TrackerClient::new(
        env.server.clone(),
        &config.issue_tracker.username,
        &config.issue_tracker.api_token,
        config.issue_tracker.verify_ssl,
        i64::from(env.time_offset_days),
        PaginationSettings {
            enabled: pagination.enabled,
            batch_size: pagination.batch_size,
            huge_threshold: pagination.huge_threshold,
            large_batch_size: pagination.large_batch_size,
            fetch_changelog_for_large: pagination.fetch_changelog_for_large,
            max_retries: pagination.max_retries,
            retry_delay: std::time::Duration::from_secs(pagination.retry_delay_seconds),
        },
    )?
    .with_stop_flag(Arc::clone(&stop));

    let plans: Vec<TeamPlan> = config
        .teams
        .iter()
        .map(|team| TeamPlan {
            name: team.name.clone(),
            repositories: team.repositories.clone(),
            member_logins: team.members.iter().map(|m| m.source_login.clone()).collect(),
            tracker_logins: team
                .members
                .iter()
                .map(|m| m.issue_tracker_login.clone())
                .collect(),
            filter_ids: env.filter_ids.clone(),
            project_keys: config.issue_tracker.project_keys.clone(),
        })
        .collect();

    let window = range.window(Utc::now());
    let collector = Collector::new(
        Arc::new(source) as Arc<dyn RepoSource>,
        Arc::new(tracker) as Arc<dyn IssueSource>,
        PoolSizes::default(),
    )
    .with_stop_flag(stop);

    let outcome = collector.collect(plans, window).await;
    let bundle = build_bundle(config, &range, environment, outcome);
    let (teams, persons, partial) = (bundle.teams.len(), bundle.persons.len(), bundle.partial);

    let key = CacheKey::new(range, environment);
    let header = ArtifactHeader {
        created_at: Utc::now(),
        range_spec: range.to_string(),
        environment: environment.to_string(),
        collector_versions: collector_versions(),
    };
    // persist() fsyncs before returning; only then is the event
    // published, so subscribers always observe the new artifact.
    let artifact_path = cache.persist(&key, header, bundle)?;

    bus.publish(Event::new(EventType::DataCollected).with_key(range.to_string(), environment));
    info!(range = %range, environment, partial, "collection job finished");

    Ok(JobOutcome {
        artifact_path,
        partial,
        teams,
        persons,
    })
}

/// Compute the full metric payload from a collection outcome.
#[must_use]
pub(crate) fn build_bundle(
    config: &AppConfig,
    range: &RangeSpec,
    environment: &str,
    outcome: CollectionOutcome,
) -> MetricsBundle {
    let kernel = MetricsKernel::new(flowmetric_metrics::DoraOptions {
        incidents: flowmetric_metrics::IncidentRules {
            issue_types: config.incidents.issue_types.clone(),
            labels: config.incidents.labels.clone(),
        },
        blast_radius_hours: config.incidents.blast_radius_hours,
        extend_to_next_release: config.incidents.extend_to_next_release,
    });

    let teams: Vec<_> = outcome
        .team_sets
        .iter()
        .map(|set| kernel.compute_team(set))
        .collect();

    let window = outcome
        .team_sets
        .first()
        .and_then(|set| set.window)
        .unwrap_or_else(|| range.window(Utc::now()));

    let mut persons: Vec<_> = outcome
        .person_inputs
        .iter()
        .map(|inputs| {
            let delivery = teams
                .iter()
                .find(|team| team.team == inputs.team)
                .map(|team| team.delivery.clone())
                .unwrap_or_default();
            inputs.compute(&window, &delivery)
        })
        .collect();

    let team_sizes: Option<BTreeMap<String, f64>> = config
        .scoring
        .normalize_by_team_size
        .then(|| {
            config
                .teams
                .iter()
                .map(|team| (team.name.clone(), team.members.len().max(1) as f64))
                .collect()
        });
    apply_scores(&mut persons, &config.performance_weights, team_sizes.as_ref());

    let comparison = comparison_rows(&teams);
    let partial = outcome.partial || teams.iter().any(|t| t.partial);

    MetricsBundle {
        teams,
        persons,
        comparison,
        metadata: MetricsMetadata {
            generated_at: Utc::now(),
            range_spec: range.to_string(),
            environment: environment.to_string(),
        },
        partial,
    }
}

fn collector_versions() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "flowmetric-sourcehost".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        (
            "flowmetric-tracker".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
    ])
}
