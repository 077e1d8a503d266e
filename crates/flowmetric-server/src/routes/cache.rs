//! Cache management endpoints.

use super::{resolve_key, KeyQuery};
use crate::context::SharedContext;
use crate::error::ApiResult;
use axum::extract::{Query, State};
use axum::Json;
use flowmetric_cache::CacheKey;
use flowmetric_error::FlowError;
use flowmetric_events::{Event, EventType};
use serde_json::{json, Value};
use tracing::info;

/// `POST /api/reload-cache` — promote the on-disk artifact for a key.
pub async fn reload(
    State(ctx): State<SharedContext>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<Value>> {
    let key = resolve_key(&ctx, &query)?;
    let found = ctx.cache.reload(&key)?;
    if !found {
        return Err(FlowError::NotFound(format!("no artifact for {key}")).into());
    }
    info!(key = %key, "artifact reloaded on demand");
    Ok(Json(json!({ "reloaded": true, "key": key.to_string() })))
}

/// `GET /api/cache/stats` — running counters.
pub async fn stats(State(ctx): State<SharedContext>) -> Json<Value> {
    Json(json!(ctx.cache.stats()))
}

/// `POST /api/cache/clear` — evict every memory entry.
pub async fn clear(State(ctx): State<SharedContext>) -> Json<Value> {
    let cleared = ctx.cache.clear_memory();
    ctx.bus.publish(Event::new(EventType::CacheInvalidated));
    Json(json!({ "cleared": cleared }))
}

/// `POST /api/cache/warm` — pre-load the configured keys.
pub async fn warm(State(ctx): State<SharedContext>) -> ApiResult<Json<Value>> {
    let keys: Vec<CacheKey> = ctx
        .config
        .cache
        .warm_keys
        .iter()
        .map(|spec| CacheKey::parse(spec))
        .collect::<Result<_, _>>()?;
    let warmed = ctx.cache.warm(&keys);
    ctx.bus.publish(Event::new(EventType::CacheWarmed));
    Ok(Json(json!({ "requested": keys.len(), "warmed": warmed })))
}
