//! Router assembly and the serve loop.

use crate::auth;
use crate::context::SharedContext;
use crate::middleware::{headers, perf, rate_limit, validate};
use crate::routes;
use axum::routing::{get, post};
use axum::Router;
use flowmetric_error::{FlowError, Result};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full router over a context.
///
/// Layer ordering: axum applies the innermost-added layer last, so the
/// chain below reads request-side as
/// trace → timing/headers → **rate-limit → auth → validate** → route.
#[must_use]
pub fn build_router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .route("/api/refresh", get(routes::refresh::refresh))
        .route("/api/refresh/{jobId}", get(routes::refresh::job_status))
        .route("/api/reload-cache", post(routes::cache::reload))
        .route("/api/cache/stats", get(routes::cache::stats))
        .route("/api/cache/clear", post(routes::cache::clear))
        .route("/api/cache/warm", post(routes::cache::warm))
        .route("/api/health", get(routes::health::health))
        .route("/api/teams", get(routes::teams::list))
        .route("/api/events/recent", get(routes::events::recent))
        .route("/api/settings/weights", post(routes::settings::update_weights))
        .route("/api/export/team/{team}/{format}", get(routes::export::team))
        .route("/api/export/person/{login}/{format}", get(routes::export::person))
        .route("/api/export/comparison/{format}", get(routes::export::comparison))
        .route(
            "/api/export/team-members/{team}/{format}",
            get(routes::export::team_members),
        )
        .route("/metrics/api/overview", get(routes::perf::overview))
        .route("/metrics/api/slow-routes", get(routes::perf::slow_routes))
        .route("/metrics/api/route-trend", get(routes::perf::route_trend))
        .route(
            "/metrics/api/cache-effectiveness",
            get(routes::perf::cache_effectiveness),
        )
        .route("/metrics/api/health-score", get(routes::perf::health_score))
        .route("/metrics/api/rotate", get(routes::perf::rotate))
        .layer(axum::middleware::from_fn(validate::validate_path))
        .layer(axum::middleware::from_fn_with_state(ctx.clone(), auth::basic_auth))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            rate_limit::rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            perf::track_request,
        ))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            headers::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// `Internal` when the listener cannot bind or the accept loop fails.
pub async fn run(ctx: SharedContext) -> Result<()> {
    let port = ctx.config.dashboard.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let router = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FlowError::internal(format!("bind {addr}: {e}")))?;
    info!(%addr, "dashboard listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| FlowError::internal(format!("serve: {e}")))
}
