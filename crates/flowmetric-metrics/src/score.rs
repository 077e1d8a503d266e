//! Performance scorer (C5).
//!
//! Each of the ten dimensions is min-max normalized across the peer
//! group into [0, 1] — inverted for smaller-is-better dimensions — then
//! combined with the configured weight vector into a score in [0, 100].

use flowmetric_types::{MetricValue, PersonMetrics, PerformanceWeights};
use std::collections::BTreeMap;

/// Number of scored dimensions; matches `PerformanceWeights::entries`.
const DIMENSIONS: usize = 10;

/// Raw dimension vector for one person. Missing dimensions are 0.
fn dimensions(person: &PersonMetrics, team_sizes: Option<&BTreeMap<String, f64>>) -> [f64; DIMENSIONS] {
    let team_size = team_sizes
        .and_then(|sizes| sizes.get(&person.team).copied())
        .filter(|n| *n > 0.0)
        .unwrap_or(1.0);

    let volume = |v: u64| v as f64 / team_size;
    let value = |v: MetricValue| v.as_f64().unwrap_or(0.0);

    [
        volume(person.pr_count),
        volume(person.review_count),
        volume(person.commit_count),
        value(person.cycle_time_hours),
        volume(person.completed_issues),
        value(person.merge_rate),
        value(person.deployment_frequency_per_day),
        value(person.lead_time_hours),
        value(person.change_failure_rate),
        value(person.mttr_hours),
    ]
}

/// Score one person against the peer group (which must include the
/// person). Returns `100 · Σ wᵢ·sᵢ` rounded to one decimal.
///
/// Weights are assumed validated (§config); `team_sizes` divides the
/// volume-like dimensions when team-size normalization is enabled.
#[must_use]
pub fn score_person(
    person: &PersonMetrics,
    peers: &[PersonMetrics],
    weights: &PerformanceWeights,
    team_sizes: Option<&BTreeMap<String, f64>>,
) -> f64 {
    let own = dimensions(person, team_sizes);
    let all: Vec<[f64; DIMENSIONS]> = peers.iter().map(|p| dimensions(p, team_sizes)).collect();

    let entries = weights.entries();
    let mut total = 0.0;
    for (i, (_, weight, larger_is_better)) in entries.iter().enumerate() {
        let min = all.iter().map(|d| d[i]).fold(f64::INFINITY, f64::min);
        let max = all.iter().map(|d| d[i]).fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        let normalized = if span <= f64::EPSILON {
            0.0
        } else if *larger_is_better {
            (own[i] - min) / span
        } else {
            (max - own[i]) / span
        };
        total += weight * normalized;
    }

    (total * 1000.0).round() / 10.0
}

/// Fill in `score` on every person, peer-normalized across the whole
/// slice.
pub fn apply_scores(
    persons: &mut [PersonMetrics],
    weights: &PerformanceWeights,
    team_sizes: Option<&BTreeMap<String, f64>>,
) {
    let peers = persons.to_vec();
    for person in persons.iter_mut() {
        person.score = Some(score_person(person, &peers, weights, team_sizes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(login: &str, prs: u64, reviews: u64) -> PersonMetrics {
        PersonMetrics {
            login: login.to_string(),
            team: "platform".to_string(),
            pr_count: prs,
            review_count: reviews,
            ..Default::default()
        }
    }

    fn flat_weights() -> PerformanceWeights {
        // All weight on PR count for predictable assertions.
        PerformanceWeights {
            prs: 1.0,
            reviews: 0.0,
            commits: 0.0,
            cycle_time: 0.0,
            jira_completed: 0.0,
            merge_rate: 0.0,
            deployment_frequency: 0.0,
            lead_time: 0.0,
            change_failure_rate: 0.0,
            mttr: 0.0,
        }
    }

    #[test]
    fn test_score_bounds() {
        let peers = vec![person("a", 0, 0), person("b", 5, 0), person("c", 10, 0)];
        let weights = PerformanceWeights::default();
        for p in &peers {
            let score = score_person(p, &peers, &weights, None);
            assert!((0.0..=100.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn test_peer_minimum_scores_zero() {
        let peers = vec![person("a", 0, 0), person("b", 10, 4)];
        let score = score_person(&peers[0], &peers, &PerformanceWeights::default(), None);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_peer_maximum_on_single_dimension() {
        let peers = vec![person("a", 0, 0), person("b", 10, 0)];
        let score = score_person(&peers[1], &peers, &flat_weights(), None);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_all_equal_peers_score_zero() {
        let peers = vec![person("a", 5, 5), person("b", 5, 5)];
        let score = score_person(&peers[0], &peers, &PerformanceWeights::default(), None);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_inverted_dimension() {
        // Lower cycle time is better: alice (10h) should beat bob (50h).
        let weights = PerformanceWeights {
            prs: 0.0,
            cycle_time: 1.0,
            reviews: 0.0,
            commits: 0.0,
            jira_completed: 0.0,
            merge_rate: 0.0,
            deployment_frequency: 0.0,
            lead_time: 0.0,
            change_failure_rate: 0.0,
            mttr: 0.0,
        };
        let mut alice = person("alice", 0, 0);
        alice.cycle_time_hours = MetricValue::Value(10.0);
        let mut bob = person("bob", 0, 0);
        bob.cycle_time_hours = MetricValue::Value(50.0);

        let peers = vec![alice.clone(), bob.clone()];
        assert_eq!(score_person(&alice, &peers, &weights, None), 100.0);
        assert_eq!(score_person(&bob, &peers, &weights, None), 0.0);
    }

    #[test]
    fn test_missing_dimension_treated_as_zero() {
        // bob has no cycle time at all; with inversion, 0 is the best
        // raw value, so alice's 10h puts her at the peer maximum of the
        // inverted scale's low end.
        let weights = PerformanceWeights {
            cycle_time: 1.0,
            prs: 0.0,
            reviews: 0.0,
            commits: 0.0,
            jira_completed: 0.0,
            merge_rate: 0.0,
            deployment_frequency: 0.0,
            lead_time: 0.0,
            change_failure_rate: 0.0,
            mttr: 0.0,
        };
        let mut alice = person("alice", 0, 0);
        alice.cycle_time_hours = MetricValue::Value(10.0);
        let bob = person("bob", 0, 0);

        let peers = vec![alice.clone(), bob.clone()];
        assert_eq!(score_person(&alice, &peers, &weights, None), 0.0);
        assert_eq!(score_person(&bob, &peers, &weights, None), 100.0);
    }

    #[test]
    fn test_team_size_normalization() {
        // Same PR count, but alice's team is twice the size, so her
        // per-head volume is half of bob's.
        let mut alice = person("alice", 10, 0);
        alice.team = "big".to_string();
        let mut bob = person("bob", 10, 0);
        bob.team = "small".to_string();

        let sizes = BTreeMap::from([("big".to_string(), 10.0), ("small".to_string(), 5.0)]);
        let peers = vec![alice.clone(), bob.clone()];

        assert_eq!(score_person(&bob, &peers, &flat_weights(), Some(&sizes)), 100.0);
        assert_eq!(score_person(&alice, &peers, &flat_weights(), Some(&sizes)), 0.0);
        // Without normalization they tie at the minimum.
        assert_eq!(score_person(&alice, &peers, &flat_weights(), None), 0.0);
        assert_eq!(score_person(&bob, &peers, &flat_weights(), None), 0.0);
    }

    #[test]
    fn test_apply_scores_fills_everyone() {
        let mut persons = vec![person("a", 1, 2), person("b", 3, 4)];
        apply_scores(&mut persons, &PerformanceWeights::default(), None);
        assert!(persons.iter().all(|p| p.score.is_some()));
    }

    #[test]
    fn test_score_rounded_to_one_decimal() {
        let peers = vec![person("a", 0, 0), person("b", 1, 0), person("c", 3, 0)];
        let weights = flat_weights();
        let score = score_person(&peers[1], &peers, &weights, None);
        // 1/3 of the span → 33.3 after rounding.
        assert_eq!(score, 33.3);
    }
}
