//! Per-client token-bucket rate limiting.

use crate::context::SharedContext;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::warn;

/// Token bucket: refills continuously at the configured rate.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, tokens: f64) -> bool {
        let now = Instant::now();
        let refilled = now.duration_since(self.last_refill).as_secs_f64() * self.refill_per_sec;
        self.tokens = (self.tokens + refilled).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }
}

/// Limiter state: one bucket per client address.
pub struct RateLimiter {
    enabled: bool,
    per_minute: u32,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Limiter allowing `per_minute` requests per client with an equal
    /// burst capacity.
    #[must_use]
    pub fn new(enabled: bool, per_minute: u32) -> Self {
        Self {
            enabled,
            per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `client`; `true` when allowed.
    pub fn check(&self, client: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(client.to_string()).or_insert_with(|| {
            TokenBucket::new(f64::from(self.per_minute), f64::from(self.per_minute) / 60.0)
        });
        bucket.try_consume(1.0)
    }

    /// Configured limit, for the `X-RateLimit-Limit` header.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.per_minute
    }
}

/// Outermost middleware: throttle per client IP before anything else
/// runs.
pub async fn rate_limit(
    State(ctx): State<SharedContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = addr.ip().to_string();
    if !ctx.limiter.check(&client) {
        warn!(client = %client, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("content-type", "application/json"),
                ("retry-after", "60"),
            ],
            format!(
                r#"{{"error":"rate_limited","message":"limit of {} requests/minute exceeded"}}"#,
                ctx.limiter.limit()
            ),
        )
            .into_response();
    }
    next.run(request).await
}
