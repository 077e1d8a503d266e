//! Performance-score weight vector.

use serde::{Deserialize, Serialize};

/// Error from validating a weight vector.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WeightError {
    #[error("weights must sum to 1.0 +/- 0.01, got {0:.4}")]
    Sum(f64),

    #[error("weight {name} = {value} out of [0, 1]")]
    Range { name: &'static str, value: f64 },
}

/// Weights over the ten scored dimensions. Must sum to 1.0 ± 0.01 with
/// each weight in [0, 1]; violation is a fatal config error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PerformanceWeights {
    pub prs: f64,
    pub reviews: f64,
    pub commits: f64,
    pub cycle_time: f64,
    pub jira_completed: f64,
    pub merge_rate: f64,
    pub deployment_frequency: f64,
    pub lead_time: f64,
    pub change_failure_rate: f64,
    pub mttr: f64,
}

impl Default for PerformanceWeights {
    fn default() -> Self {
        Self {
            prs: 0.2,
            reviews: 0.15,
            commits: 0.1,
            cycle_time: 0.1,
            jira_completed: 0.15,
            merge_rate: 0.05,
            deployment_frequency: 0.08,
            lead_time: 0.07,
            change_failure_rate: 0.05,
            mttr: 0.05,
        }
    }
}

impl PerformanceWeights {
    /// All weights as `(name, value, larger_is_better)` triples, in the
    /// stable scoring order.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, f64, bool); 10] {
        [
            ("prs", self.prs, true),
            ("reviews", self.reviews, true),
            ("commits", self.commits, true),
            ("cycleTime", self.cycle_time, false),
            ("jiraCompleted", self.jira_completed, true),
            ("mergeRate", self.merge_rate, true),
            ("deploymentFrequency", self.deployment_frequency, true),
            ("leadTime", self.lead_time, false),
            ("changeFailureRate", self.change_failure_rate, false),
            ("mttr", self.mttr, false),
        ]
    }

    /// Validate the sum and per-weight range.
    ///
    /// # Errors
    ///
    /// [`WeightError::Range`] for the first out-of-range weight, then
    /// [`WeightError::Sum`] when the total misses 1.0 by more than 0.01.
    pub fn validate(&self) -> Result<(), WeightError> {
        for (name, value, _) in self.entries() {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(WeightError::Range { name, value });
            }
        }
        let sum: f64 = self.entries().iter().map(|(_, v, _)| v).sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(WeightError::Sum(sum));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_validate() {
        PerformanceWeights::default().validate().unwrap();
    }

    #[test]
    fn test_sum_tolerance_boundary() {
        // 0.99 total is inside the +/- 0.01 tolerance.
        let accepted = PerformanceWeights {
            prs: 0.19,
            ..PerformanceWeights::default()
        };
        accepted.validate().unwrap();

        // 0.98 total is outside.
        let rejected = PerformanceWeights {
            prs: 0.18,
            ..PerformanceWeights::default()
        };
        assert!(matches!(rejected.validate(), Err(WeightError::Sum(_))));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = PerformanceWeights {
            prs: -0.1,
            mttr: 0.35,
            ..PerformanceWeights::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(WeightError::Range { name: "prs", .. })
        ));
    }

    #[test]
    fn test_serde_uses_camel_case_keys() {
        let json = serde_json::to_value(PerformanceWeights::default()).unwrap();
        assert!(json.get("cycleTime").is_some());
        assert!(json.get("jiraCompleted").is_some());
        assert!(json.get("cycle_time").is_none());
    }
}
