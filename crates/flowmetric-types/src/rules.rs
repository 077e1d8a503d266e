//! Configurable classification rules and issue-key extraction.

use crate::ReleaseEnvironment;
use regex::Regex;
use std::sync::OnceLock;

/// Errors from compiling classification rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid release pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Tag/name pattern rules mapping releases to environments.
///
/// Patterns are deployment-specific and always come from configuration;
/// a release matching no rule classifies as `other`.
#[derive(Debug, Clone, Default)]
pub struct ReleaseRules {
    production: Vec<Regex>,
    staging: Vec<Regex>,
}

impl ReleaseRules {
    /// Compile rule lists.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Pattern`] for the first pattern that fails to
    /// compile.
    pub fn compile(production: &[String], staging: &[String]) -> Result<Self, RuleError> {
        Ok(Self {
            production: compile_all(production)?,
            staging: compile_all(staging)?,
        })
    }

    /// Classify a release by tag and display name. Production rules win
    /// over staging rules when both match.
    #[must_use]
    pub fn classify(&self, tag: &str, name: &str) -> ReleaseEnvironment {
        if matches_any(&self.production, tag, name) {
            ReleaseEnvironment::Production
        } else if matches_any(&self.staging, tag, name) {
            ReleaseEnvironment::Staging
        } else {
            ReleaseEnvironment::Other
        }
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, RuleError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| RuleError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn matches_any(rules: &[Regex], tag: &str, name: &str) -> bool {
    rules.iter().any(|re| re.is_match(tag) || re.is_match(name))
}

/// Extract tracker issue keys (`PROJ-123`) from PR title, body and head
/// branch, deduplicated in first-seen order.
#[must_use]
pub fn extract_issue_keys(title: &str, body: &str, head_ref: Option<&str>) -> Vec<String> {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").unwrap_or_else(|_| unreachable!())
    });

    let mut keys = Vec::new();
    for text in [title, body, head_ref.unwrap_or_default()] {
        for m in re.find_iter(text) {
            let key = m.as_str().to_string();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}
