//! Request timing: one row per served request into the perf store.

use crate::context::SharedContext;
use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use flowmetric_perftrack::RequestSample;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Response extension handlers set when they answered from cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheHit(pub bool);

/// Outermost wrapper: times the request, stamps `x-request-id`, and
/// records the row. Uses the matched route pattern (not the raw path)
/// so exports with different team names aggregate together.
pub async fn track_request(
    State(ctx): State<SharedContext>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let timestamp = Utc::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |m| m.as_str().to_string());

    let mut response = next.run(request).await;

    let request_id = Uuid::new_v4();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }

    let status = response.status().as_u16();
    let cache_hit = response
        .extensions()
        .get::<CacheHit>()
        .is_some_and(|hit| hit.0);
    let sample = RequestSample {
        timestamp,
        route,
        method,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        status_code: status,
        cache_hit,
        error_tag: (status >= 500).then(|| "internal_error".to_string()),
    };
    if let Err(e) = ctx.perf.record(&sample) {
        warn!(error = %e, "request timing not recorded");
    }
    response
}
