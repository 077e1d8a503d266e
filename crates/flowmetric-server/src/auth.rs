//! HTTP Basic authentication with PBKDF2-SHA256 password hashes.
//!
//! Stored hashes use the form
//! `pbkdf2-sha256$<iterations>$<salt-b64>$<digest-b64>`; verification
//! recomputes the digest and compares in constant time.

use crate::context::SharedContext;
use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use flowmetric_error::FlowError;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

const SCHEME: &str = "pbkdf2-sha256";

/// Produce a stored hash for `password`. Used by operators (via the
/// docs) and by tests; the server itself only verifies.
#[must_use]
pub fn hash_password(password: &str, iterations: u32, salt: &[u8]) -> String {
    let mut digest = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut digest);
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD;
    format!(
        "{SCHEME}${iterations}${}${}",
        b64.encode(salt),
        b64.encode(digest)
    )
}

/// Constant-time verification of `password` against a stored hash.
/// Malformed stored hashes verify as false.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(digest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Some(salt) = decode_b64(salt) else {
        return false;
    };
    let Some(expected) = decode_b64(digest) else {
        return false;
    };
    if expected.len() != 32 {
        return false;
    }

    let mut computed = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut computed);
    computed.ct_eq(expected.as_slice()).into()
}

fn decode_b64(raw: &str) -> Option<Vec<u8>> {
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD;
    b64.decode(raw)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw))
        .ok()
}

/// Basic-auth middleware. A no-op when auth is disabled; otherwise the
/// request must carry valid credentials for a configured user.
pub async fn basic_auth(
    State(ctx): State<SharedContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !ctx.config.dashboard.auth.enabled {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some((username, password)) = decode_basic(header) else {
        return Err(FlowError::Auth("credentials required".into()).into());
    };

    let authorized = ctx
        .config
        .dashboard
        .auth
        .users
        .iter()
        .find(|user| user.username == username)
        .is_some_and(|user| verify_password(&password, &user.password_hash_pbkdf2_sha256));

    if !authorized {
        warn!(username = %username, "authentication rejected");
        return Err(FlowError::Auth("invalid credentials".into()).into());
    }
    Ok(next.run(request).await)
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
