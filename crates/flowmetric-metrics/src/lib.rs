//! Metrics computation kernel (C4) and performance scorer (C5).
//!
//! Every computation here is a pure function of a [`TeamRecordSet`] (or
//! a person's slice of one). Missing inputs never raise: axes that
//! cannot be computed report their sentinel instead.
//!
//! The delivery-metrics group and the tracker-derived rollups are
//! file-level sections composed by value — no dynamic dispatch, since
//! the record set fully determines which computations apply.

mod dora;
mod kernel;
mod person;
mod score;
mod stats;
mod trends;

pub use dora::{DoraOptions, IncidentRules};
pub use kernel::MetricsKernel;
pub use person::PersonInputs;
pub use score::{apply_scores, score_person};
pub use stats::{mean, median, percentile};
pub use trends::{week_start, weekly_counts, weekly_medians};

use flowmetric_types::{ComparisonRow, TeamMetrics};

/// Project team metrics to the common comparison schema.
#[must_use]
pub fn comparison_rows(teams: &[TeamMetrics]) -> Vec<ComparisonRow> {
    teams
        .iter()
        .map(|team| ComparisonRow {
            team: team.team.clone(),
            merged_prs: team.pr.merged,
            merge_rate: team.pr.merge_rate,
            cycle_time_hours: team.pr.cycle_time.median_hours,
            reviews: team.review.total,
            deployment_frequency_per_day: team.delivery.deployment_frequency_per_day,
            lead_time_hours: team.delivery.lead_time.median_hours,
            change_failure_rate: team.delivery.change_failure_rate,
            mttr_hours: team.delivery.mttr.median_hours,
            performance_level: team.delivery.performance_level,
        })
        .collect()
}
