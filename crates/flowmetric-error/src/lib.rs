//! Unified error types for Flowmetric runtime crates.
//!
//! The error kinds form a closed set; every crate in the workspace
//! returns [`FlowError`] (or a thin local wrapper that converts into it)
//! so the HTTP edge can map failures to status codes uniformly.

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use serde::Serialize;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, FlowError>;

/// The closed error set.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// A transient upstream failure (gateway timeout, HTTP 5xx,
    /// connection reset). Consumed by the retry envelopes; surfaces only
    /// when attempts are exhausted.
    #[error("transient upstream failure: {0}")]
    UpstreamTransient(String),

    /// A permanent upstream failure (bad credentials, malformed query).
    /// Never retried.
    #[error("permanent upstream failure: {0}")]
    UpstreamPermanent(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown artifact version, truncated file, bad magic. Logged and
    /// treated as a cache miss by the cache layer.
    #[error("cache artifact corrupt: {0}")]
    CacheCorrupt(String),

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FlowError {
    /// Build the catch-all variant without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Machine-readable code, stable across releases.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Auth(_) => "auth_error",
            Self::Validation(_) => "validation_error",
            Self::UpstreamTransient(_) => "upstream_transient",
            Self::UpstreamPermanent(_) => "upstream_permanent",
            Self::NotFound(_) => "not_found",
            Self::CacheCorrupt(_) => "cache_corrupt",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the retry envelope may consume this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamTransient(_))
    }

    /// HTTP status the edge maps this error to. Upstream and cache
    /// failures surface as 500 with a terse code, never a stack trace.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Auth(_) => 401,
            Self::NotFound(_) => 404,
            Self::Config(_)
            | Self::UpstreamTransient(_)
            | Self::UpstreamPermanent(_)
            | Self::CacheCorrupt(_)
            | Self::Internal { .. } => 500,
        }
    }

    /// JSON body served at the HTTP edge: machine code plus a terse
    /// message, no source-code locations.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("i/o failure: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("serialization failure: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// Serializable error body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine code.
    pub error: &'static str,
    /// Terse human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(FlowError::Config("x".into()).error_code(), "config_error");
        assert_eq!(FlowError::Auth("x".into()).error_code(), "auth_error");
        assert_eq!(
            FlowError::UpstreamTransient("x".into()).error_code(),
            "upstream_transient"
        );
        assert_eq!(FlowError::internal("x").error_code(), "internal_error");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(FlowError::UpstreamTransient("503".into()).is_transient());
        assert!(!FlowError::UpstreamPermanent("401".into()).is_transient());
        assert!(!FlowError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(FlowError::Validation("bad team".into()).http_status(), 400);
        assert_eq!(FlowError::Auth("nope".into()).http_status(), 401);
        assert_eq!(FlowError::NotFound("artifact".into()).http_status(), 404);
        assert_eq!(FlowError::CacheCorrupt("magic".into()).http_status(), 500);
        assert_eq!(FlowError::internal("boom").http_status(), 500);
    }

    #[test]
    fn test_body_has_no_source_locations() {
        let body = FlowError::internal("db went away").to_body();
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("internal_error"));
        assert!(!json.contains("src/"));
    }
}
