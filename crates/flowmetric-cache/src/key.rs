//! Cache keys and their 1-1 mapping to artifact file names.

use flowmetric_error::{FlowError, Result};
use flowmetric_types::RangeSpec;
use std::fmt;

/// Environment name that carries no file suffix.
const DEFAULT_ENV: &str = "default";

/// A `(range-spec, environment)` pair. Fully determines one artifact:
/// two artifacts with the same key are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Reporting period.
    pub range: RangeSpec,
    /// Environment name.
    pub environment: String,
}

impl CacheKey {
    /// Build a key.
    #[must_use]
    pub fn new(range: RangeSpec, environment: impl Into<String>) -> Self {
        Self {
            range,
            environment: environment.into(),
        }
    }

    /// Parse `"90d"` or `"90d:uat"` (the warm-key config form).
    ///
    /// # Errors
    ///
    /// `ValidationError` when the range spec is malformed.
    pub fn parse(spec: &str) -> Result<Self> {
        // Explicit date ranges contain ':' themselves, so try the full
        // string as a range first and otherwise split on the LAST colon.
        let (range, env) = if spec.parse::<RangeSpec>().is_ok() {
            (spec, DEFAULT_ENV)
        } else {
            match spec.rsplit_once(':') {
                Some((range, env)) => (range, env),
                None => (spec, DEFAULT_ENV),
            }
        };
        let range: RangeSpec = range
            .parse()
            .map_err(|e| FlowError::Validation(format!("bad range spec: {e}")))?;
        Ok(Self::new(range, env))
    }

    /// Artifact file name: `metrics_<stem>[_<env>].bin`. The suffix is
    /// appended only when the environment differs from default.
    #[must_use]
    pub fn file_name(&self) -> String {
        if self.environment == DEFAULT_ENV {
            format!("metrics_{}.bin", self.range.file_stem())
        } else {
            format!("metrics_{}_{}.bin", self.range.file_stem(), self.environment)
        }
    }

    /// Map key used by the memory tier.
    #[must_use]
    pub fn memory_key(&self) -> String {
        format!("{}:{}", self.range, self.environment)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.range, self.environment)
    }
}
