//! Export serialization: flat CSV with stable column ordering, and
//! JSON mirroring the typed payload plus the metadata envelope.

use flowmetric_error::{FlowError, Result};
use flowmetric_types::{ComparisonRow, MetricValue, PersonMetrics, TeamMetrics};

/// Column order of the team export. Changing this breaks downstream
/// spreadsheets; append only.
pub const TEAM_COLUMNS: [&str; 14] = [
    "team",
    "totalPrs",
    "mergedPrs",
    "mergeRate",
    "cycleTimeMedianHours",
    "timeToFirstReviewHours",
    "reviews",
    "uniqueReviewers",
    "deploymentFrequencyPerDay",
    "leadTimeMedianHours",
    "changeFailureRate",
    "mttrMedianHours",
    "issueCount",
    "completedIssues",
];

/// Column order of the person/team-member exports.
pub const PERSON_COLUMNS: [&str; 11] = [
    "login",
    "team",
    "prs",
    "reviews",
    "commits",
    "additions",
    "deletions",
    "cycleTimeMedianHours",
    "mergeRate",
    "completedIssues",
    "score",
];

/// Column order of the comparison export.
pub const COMPARISON_COLUMNS: [&str; 10] = [
    "team",
    "mergedPrs",
    "mergeRate",
    "cycleTimeMedianHours",
    "reviews",
    "deploymentFrequencyPerDay",
    "leadTimeMedianHours",
    "changeFailureRate",
    "mttrMedianHours",
    "performanceLevel",
];

fn cell(value: MetricValue) -> String {
    value
        .as_f64()
        .map(|v| format!("{v:.2}"))
        .unwrap_or_default()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| FlowError::internal(format!("csv flush: {e}")))?;
    String::from_utf8(bytes).map_err(|e| FlowError::internal(format!("csv encoding: {e}")))
}

fn write_record(writer: &mut csv::Writer<Vec<u8>>, record: &[String]) -> Result<()> {
    writer
        .write_record(record)
        .map_err(|e| FlowError::internal(format!("csv write: {e}")))
}

fn write_header(writer: &mut csv::Writer<Vec<u8>>, columns: &[&str]) -> Result<()> {
    writer
        .write_record(columns)
        .map_err(|e| FlowError::internal(format!("csv write: {e}")))
}

fn team_record(team: &TeamMetrics) -> Vec<String> {
    vec![
        team.team.clone(),
        team.pr.total.to_string(),
        team.pr.merged.to_string(),
        cell(team.pr.merge_rate),
        cell(team.pr.cycle_time.median_hours),
        cell(team.pr.time_to_first_review_hours),
        team.review.total.to_string(),
        team.review.unique_reviewers.to_string(),
        cell(team.delivery.deployment_frequency_per_day),
        cell(team.delivery.lead_time.median_hours),
        cell(team.delivery.change_failure_rate),
        cell(team.delivery.mttr.median_hours),
        team.issue_count.to_string(),
        team.completed_issues.to_string(),
    ]
}

fn person_record(person: &PersonMetrics) -> Vec<String> {
    vec![
        person.login.clone(),
        person.team.clone(),
        person.pr_count.to_string(),
        person.review_count.to_string(),
        person.commit_count.to_string(),
        person.additions.to_string(),
        person.deletions.to_string(),
        cell(person.cycle_time_hours),
        cell(person.merge_rate),
        person.completed_issues.to_string(),
        person.score.map(|s| format!("{s:.1}")).unwrap_or_default(),
    ]
}

/// One team, one row.
///
/// # Errors
///
/// `Internal` on a CSV encoding failure.
pub fn team_csv(team: &TeamMetrics) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_header(&mut writer, &TEAM_COLUMNS)?;
    write_record(&mut writer, &team_record(team))?;
    finish(writer)
}

/// One person, one row.
///
/// # Errors
///
/// `Internal` on a CSV encoding failure.
pub fn person_csv(person: &PersonMetrics) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_header(&mut writer, &PERSON_COLUMNS)?;
    write_record(&mut writer, &person_record(person))?;
    finish(writer)
}

/// One row per comparison entry.
///
/// # Errors
///
/// `Internal` on a CSV encoding failure.
pub fn comparison_csv(rows: &[ComparisonRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_header(&mut writer, &COMPARISON_COLUMNS)?;
    for row in rows {
        let record = vec![
            row.team.clone(),
            row.merged_prs.to_string(),
            cell(row.merge_rate),
            cell(row.cycle_time_hours),
            row.reviews.to_string(),
            cell(row.deployment_frequency_per_day),
            cell(row.lead_time_hours),
            cell(row.change_failure_rate),
            cell(row.mttr_hours),
            row.performance_level
                .map(|level| format!("{level:?}").to_lowercase())
                .unwrap_or_default(),
        ];
        write_record(&mut writer, &record)?;
    }
    finish(writer)
}

/// One row per member of a team.
///
/// # Errors
///
/// `Internal` on a CSV encoding failure.
pub fn team_members_csv(members: &[&PersonMetrics]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_header(&mut writer, &PERSON_COLUMNS)?;
    for member in members {
        write_record(&mut writer, &person_record(member))?;
    }
    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmetric_types::PerformanceLevel;

    #[test]
    fn test_team_csv_shape() {
        let mut team = TeamMetrics {
            team: "platform".to_string(),
            ..Default::default()
        };
        team.pr.total = 12;
        team.pr.merged = 10;
        team.pr.merge_rate = MetricValue::Value(0.8333);

        let csv = team_csv(&team).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), TEAM_COLUMNS.len());
        let row = lines.next().unwrap();
        assert!(row.starts_with("platform,12,10,0.83,"));
    }

    #[test]
    fn test_sentinels_export_as_empty_cells() {
        let team = TeamMetrics {
            team: "empty".to_string(),
            ..Default::default()
        };
        let csv = team_csv(&team).unwrap();
        let row = csv.lines().nth(1).unwrap();
        // mergeRate (insufficient data) is an empty cell, not 0.
        assert!(row.contains("empty,0,0,,"));
    }

    #[test]
    fn test_comparison_csv_rows() {
        let rows = vec![
            ComparisonRow {
                team: "a".to_string(),
                merged_prs: 5,
                performance_level: Some(PerformanceLevel::High),
                ..Default::default()
            },
            ComparisonRow {
                team: "b".to_string(),
                ..Default::default()
            },
        ];
        let csv = comparison_csv(&rows).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains("a,5,"));
        assert!(csv.contains(",high"));
    }

    #[test]
    fn test_person_csv_score_one_decimal() {
        let person = PersonMetrics {
            login: "alice".to_string(),
            team: "platform".to_string(),
            score: Some(72.25),
            ..Default::default()
        };
        let csv = person_csv(&person).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with("72.2") || csv.lines().nth(1).unwrap().ends_with("72.3"));
    }
}
