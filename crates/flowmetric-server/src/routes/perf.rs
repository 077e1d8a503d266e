//! `/metrics/api/*` — the performance-tracker surface.

use crate::context::SharedContext;
use crate::error::ApiResult;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct PerfQuery {
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub route: Option<String>,
}

fn default_days() -> u32 {
    7
}

fn default_limit() -> u32 {
    10
}

/// `GET /metrics/api/overview`.
pub async fn overview(
    State(ctx): State<SharedContext>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Json<Value>> {
    let health = ctx.perf.health_score(query.days)?;
    let slowest = ctx.perf.slowest_routes(5, query.days)?;
    Ok(Json(json!({
        "health": health,
        "slowestRoutes": slowest,
        "cache": ctx.cache.stats(),
    })))
}

/// `GET /metrics/api/slow-routes`.
pub async fn slow_routes(
    State(ctx): State<SharedContext>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Json<Value>> {
    let routes = ctx.perf.slowest_routes(query.limit, query.days)?;
    Ok(Json(json!({ "routes": routes })))
}

/// `GET /metrics/api/route-trend?route=/api/metrics`.
pub async fn route_trend(
    State(ctx): State<SharedContext>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Json<Value>> {
    let route = query.route.as_deref().unwrap_or("/api/metrics");
    let stats = ctx.perf.route_stats(route, query.days)?;
    let hourly = ctx.perf.hourly_metrics(route, query.days)?;
    Ok(Json(json!({ "stats": stats, "hourly": hourly })))
}

/// `GET /metrics/api/cache-effectiveness`.
pub async fn cache_effectiveness(
    State(ctx): State<SharedContext>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Json<Value>> {
    let metrics_route = ctx.perf.route_stats("/api/metrics", query.days)?;
    Ok(Json(json!({
        "cache": ctx.cache.stats(),
        "metricsRoute": {
            "count": metrics_route.count,
            "cacheHitRate": metrics_route.cache_hit_rate,
        },
    })))
}

/// `GET /metrics/api/health-score`.
pub async fn health_score(
    State(ctx): State<SharedContext>,
    Query(query): Query<PerfQuery>,
) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "health": ctx.perf.health_score(query.days)? })))
}

/// `GET /metrics/api/rotate` — apply the configured retention.
pub async fn rotate(State(ctx): State<SharedContext>) -> ApiResult<Json<Value>> {
    let removed = ctx
        .perf
        .rotate(ctx.config.performance_tracker.retention_days)?;
    Ok(Json(json!({ "removed": removed })))
}
