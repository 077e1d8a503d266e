//! Input validation.
//!
//! The middleware rejects URLs containing anything outside the safe
//! path charset before routing; handlers use the helpers for the
//! stricter per-segment rules (team names and logins).

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use flowmetric_error::{FlowError, Result};
use flowmetric_types::RangeSpec;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::ApiError;

fn team_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 ._-]{1,100}$").unwrap_or_else(|_| unreachable!()))
}

fn login_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,39}$").unwrap_or_else(|_| unreachable!()))
}

/// Validate a team path segment.
///
/// # Errors
///
/// `ValidationError` (rendered as 400) when the segment fails the rule.
pub fn validate_team_name(raw: &str) -> Result<&str> {
    if team_re().is_match(raw) {
        Ok(raw)
    } else {
        Err(FlowError::Validation(format!("invalid team name {raw:?}")))
    }
}

/// Validate a login path segment.
///
/// # Errors
///
/// `ValidationError` when the segment fails the rule.
pub fn validate_login(raw: &str) -> Result<&str> {
    if login_re().is_match(raw) {
        Ok(raw)
    } else {
        Err(FlowError::Validation(format!("invalid login {raw:?}")))
    }
}

/// Parse and validate a `range` query value.
///
/// # Errors
///
/// `ValidationError` for anything outside the range-spec grammar.
pub fn validate_range(raw: &str) -> Result<RangeSpec> {
    raw.parse()
        .map_err(|e| FlowError::Validation(format!("invalid range spec: {e}")))
}

/// Gross URL hygiene applied before routing: percent signs, control
/// characters and non-ASCII are rejected wholesale.
pub async fn validate_path(request: Request<Body>, next: Next) -> std::result::Result<Response, ApiError> {
    let path = request.uri().path();
    let acceptable = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ' ' | '.' | '_' | '-' | '%' | '~'));
    if !acceptable {
        return Err(FlowError::Validation("unacceptable characters in path".into()).into());
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_names() {
        assert!(validate_team_name("Platform Team").is_ok());
        assert!(validate_team_name("core_2.0-beta").is_ok());
        assert!(validate_team_name("").is_err());
        assert!(validate_team_name("a/b").is_err());
        assert!(validate_team_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_logins() {
        assert!(validate_login("alice").is_ok());
        assert!(validate_login("alice.b-c_d").is_ok());
        assert!(validate_login("alice bob").is_err());
        assert!(validate_login(&"x".repeat(40)).is_err());
        assert!(validate_login("").is_err());
    }

    #[test]
    fn test_ranges() {
        assert!(validate_range("90d").is_ok());
        assert!(validate_range("Q1-2026").is_ok());
        assert!(validate_range("45d").is_err());
        assert!(validate_range("drop table").is_err());
    }
}
