//! Delivery (DORA) metrics.
//!
//! Deployment frequency, lead time for changes, change failure rate and
//! mean time to restore, computed over one team's record set. The
//! measurement period is the intersection of the requested window with
//! the observed data range; an empty intersection makes every delivery
//! axis not-applicable.

use crate::stats::{median, percentile};
use crate::trends::weekly_counts;
use chrono::{DateTime, Duration, Utc};
use flowmetric_types::{
    DeliveryMetrics, IncidentSummary, Issue, LeadTimeStats, MetricValue, MttrStats,
    PerformanceLevel, PullRequest, Release, TeamRecordSet, Window,
};
use tracing::debug;

/// Rules identifying incidents among tracker issues.
#[derive(Debug, Clone, Default)]
pub struct IncidentRules {
    /// Issue types counting as incidents.
    pub issue_types: Vec<String>,
    /// Labels counting as incidents.
    pub labels: Vec<String>,
}

impl IncidentRules {
    fn matches(&self, issue: &Issue) -> bool {
        self.issue_types.iter().any(|t| t == &issue.issue_type)
            || self.labels.iter().any(|l| issue.labels.contains(l))
    }
}

/// Tunables for the delivery-metrics group.
#[derive(Debug, Clone)]
pub struct DoraOptions {
    /// Incident identification rules.
    pub incidents: IncidentRules,
    /// Hours after a release during which a new incident marks it
    /// failed.
    pub blast_radius_hours: f64,
    /// Widen the attribution window to the next production release
    /// (or the window end for the last release).
    pub extend_to_next_release: bool,
}

impl Default for DoraOptions {
    fn default() -> Self {
        Self {
            incidents: IncidentRules::default(),
            blast_radius_hours: 24.0,
            extend_to_next_release: false,
        }
    }
}

pub(crate) fn compute(set: &TeamRecordSet, window: &Window, options: &DoraOptions) -> DeliveryMetrics {
    let Some(measured) = measurement_period(set, window) else {
        return DeliveryMetrics {
            deployment_frequency_per_day: MetricValue::NotApplicable,
            weekly_deployments: Vec::new(),
            lead_time: LeadTimeStats {
                median_hours: MetricValue::NotApplicable,
                p75_hours: MetricValue::NotApplicable,
                p90_hours: MetricValue::NotApplicable,
                attributed_prs: 0,
            },
            change_failure_rate: MetricValue::NotApplicable,
            mttr: MttrStats {
                median_hours: MetricValue::NotApplicable,
                p95_hours: MetricValue::NotApplicable,
                recent: Vec::new(),
            },
            performance_level: None,
            measured: None,
        };
    };

    let mut production: Vec<&Release> = set
        .releases
        .iter()
        .filter(|r| r.is_production() && measured.contains(r.published_at))
        .collect();
    production.sort_by_key(|r| r.published_at);

    let deployment_frequency = deployment_frequency(&production, &measured);
    let weekly = weekly_counts(production.iter().map(|r| r.published_at), &measured);
    let lead_time = lead_time(&production, set, &measured);
    // Incidents are scoped to the requested window, not the narrower
    // measurement period.
    let incidents = incidents_in(set, window, &options.incidents);
    let change_failure_rate = change_failure_rate(&production, &incidents, &measured, options);
    let mttr = mttr(&incidents);

    let performance_level = classify(
        deployment_frequency,
        lead_time.median_hours,
        change_failure_rate,
        mttr.median_hours,
    );

    DeliveryMetrics {
        deployment_frequency_per_day: deployment_frequency,
        weekly_deployments: weekly,
        lead_time,
        change_failure_rate,
        mttr,
        performance_level,
        measured: Some(measured),
    }
}

/// Requested window ∩ observed data range (earliest to latest of
/// releases and PR principal timestamps).
fn measurement_period(set: &TeamRecordSet, window: &Window) -> Option<Window> {
    let observed = set
        .releases
        .iter()
        .map(|r| r.published_at)
        .chain(set.prs.iter().map(PullRequest::principal_timestamp));

    let (mut earliest, mut latest) = (None::<DateTime<Utc>>, None::<DateTime<Utc>>);
    for t in observed {
        earliest = Some(earliest.map_or(t, |e| e.min(t)));
        latest = Some(latest.map_or(t, |l| l.max(t)));
    }
    let (earliest, latest) = (earliest?, latest?);

    // The latest observation itself must fall inside the half-open span.
    window.intersect(&Window::new(earliest, latest + Duration::seconds(1)))
}

fn deployment_frequency(production: &[&Release], measured: &Window) -> MetricValue {
    let days = measured.len_days();
    if days <= 0 {
        return MetricValue::NotApplicable;
    }
    MetricValue::Value(production.len() as f64 / days as f64)
}

/// PR→release mapping. The issue-keyed path is attempted first; the
/// time-based fallback applies only when it attributes nothing.
fn lead_time(production: &[&Release], set: &TeamRecordSet, measured: &Window) -> LeadTimeStats {
    let mut lead_hours: Vec<f64> = Vec::new();
    let mut attributed = 0u64;

    for (index, release) in production.iter().enumerate() {
        let previous_at = production[..index]
            .iter()
            .rev()
            .find(|prev| prev.repo == release.repo)
            .map(|prev| prev.published_at);
        let prs = attribute_prs(release, previous_at, set, measured);
        for pr in prs {
            let Some(merged_at) = pr.merged_at else { continue };
            let hours = (release.published_at - merged_at).num_seconds() as f64 / 3600.0;
            if hours < 0.0 {
                // Negative lead time indicates a mis-mapping.
                debug!(pr = pr.id, release = %release.tag, "discarding negative lead time");
                continue;
            }
            attributed += 1;
            lead_hours.push(hours);
        }
    }

    LeadTimeStats {
        median_hours: median(&lead_hours).into(),
        p75_hours: percentile(&lead_hours, 75.0).into(),
        p90_hours: percentile(&lead_hours, 90.0).into(),
        attributed_prs: attributed,
    }
}

/// Resolution order of §-lead-time: issue keys cross-referenced against
/// the fix-version's issue list, then the time-based fallback.
fn attribute_prs<'a>(
    release: &Release,
    previous_at: Option<DateTime<Utc>>,
    set: &'a TeamRecordSet,
    measured: &Window,
) -> Vec<&'a PullRequest> {
    // Path 1: the fix-version matching this release names its issues;
    // PRs referencing any of them are the change set.
    let fix_version = set
        .fix_versions
        .iter()
        .find(|v| v.released && (v.name == release.tag || v.name == release.name));
    if let Some(version) = fix_version {
        let keyed: Vec<&PullRequest> = set
            .prs
            .iter()
            .filter(|pr| pr.merged_at.is_some())
            .filter(|pr| pr.issue_keys.iter().any(|k| version.issue_keys.contains(k)))
            .collect();
        if !keyed.is_empty() {
            return keyed;
        }
    }

    // Path 2: merged after the previous production release of the same
    // repository and on/before this one.
    let lower = previous_at.unwrap_or(measured.since - Duration::seconds(1));
    set.prs
        .iter()
        .filter(|pr| pr.repo == release.repo)
        .filter(|pr| {
            pr.merged_at
                .is_some_and(|m| m > lower && m <= release.published_at)
        })
        .collect()
}

fn incidents_in<'a>(set: &'a TeamRecordSet, window: &Window, rules: &IncidentRules) -> Vec<&'a Issue> {
    let mut incidents: Vec<&Issue> = set
        .issues
        .iter()
        .filter(|issue| rules.matches(issue) && window.contains(issue.created_at))
        .collect();
    incidents.sort_by_key(|issue| issue.created_at);
    incidents
}

fn change_failure_rate(
    production: &[&Release],
    incidents: &[&Issue],
    measured: &Window,
    options: &DoraOptions,
) -> MetricValue {
    if production.is_empty() {
        return MetricValue::InsufficientData;
    }

    let blast = Duration::seconds((options.blast_radius_hours * 3600.0) as i64);
    let failed = production
        .iter()
        .enumerate()
        .filter(|(index, release)| {
            let upper = if options.extend_to_next_release {
                production
                    .get(index + 1)
                    .map_or(measured.until, |next| next.published_at)
            } else {
                release.published_at + blast
            };
            incidents.iter().any(|incident| {
                incident.created_at > release.published_at && incident.created_at <= upper
            })
        })
        .count();

    MetricValue::Value(failed as f64 / production.len() as f64)
}

fn mttr(incidents: &[&Issue]) -> MttrStats {
    let restore_hours: Vec<f64> = incidents
        .iter()
        .filter_map(|incident| incident.resolution_duration())
        .map(|d| d.num_seconds() as f64 / 3600.0)
        .filter(|h| *h >= 0.0)
        .collect();

    let mut recent: Vec<&Issue> = incidents.to_vec();
    recent.sort_by_key(|incident| std::cmp::Reverse(incident.created_at));
    let recent = recent
        .into_iter()
        .take(10)
        .map(|incident| IncidentSummary {
            key: incident.key.clone(),
            created_at: incident.created_at,
            resolved_at: incident.resolved_at,
            restore_hours: incident
                .resolution_duration()
                .map(|d| d.num_seconds() as f64 / 3600.0)
                .filter(|h| *h >= 0.0),
        })
        .collect();

    MttrStats {
        median_hours: median(&restore_hours).into(),
        p95_hours: percentile(&restore_hours, 95.0).into(),
        recent,
    }
}

/// Fixed industry breakpoints over (DF, LT, CFR, MTTR); the worst axis
/// wins. Classification requires all four axes to be finite.
fn classify(
    df: MetricValue,
    lead_hours: MetricValue,
    cfr: MetricValue,
    mttr_hours: MetricValue,
) -> Option<PerformanceLevel> {
    use PerformanceLevel::{Elite, High, Low, Medium};

    let df = df.as_f64()?;
    let lead = lead_hours.as_f64()?;
    let cfr = cfr.as_f64()?;
    let mttr = mttr_hours.as_f64()?;

    let df_level = if df >= 1.0 {
        Elite
    } else if df >= 1.0 / 7.0 {
        High
    } else if df >= 1.0 / 30.0 {
        Medium
    } else {
        Low
    };
    let lead_level = if lead < 24.0 {
        Elite
    } else if lead < 168.0 {
        High
    } else if lead < 720.0 {
        Medium
    } else {
        Low
    };
    let cfr_level = if cfr <= 0.05 {
        Elite
    } else if cfr <= 0.10 {
        High
    } else if cfr <= 0.15 {
        Medium
    } else {
        Low
    };
    let mttr_level = if mttr < 1.0 {
        Elite
    } else if mttr < 24.0 {
        High
    } else if mttr < 168.0 {
        Medium
    } else {
        Low
    };

    // `PerformanceLevel` orders Elite < ... < Low, so max() is worst.
    Some(
        [df_level, lead_level, cfr_level, mttr_level]
            .into_iter()
            .max()
            .unwrap_or(Low),
    )
}
