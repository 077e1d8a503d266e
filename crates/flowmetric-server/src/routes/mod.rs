//! Route handlers.

pub mod cache;
pub mod events;
pub mod export;
pub mod health;
pub mod metrics;
pub mod perf;
pub mod refresh;
pub mod settings;
pub mod teams;

use crate::context::SharedContext;
use crate::error::ApiResult;
use crate::middleware::validate::validate_range;
use flowmetric_cache::CacheKey;
use flowmetric_error::FlowError;
use flowmetric_types::MetricsBundle;
use serde::Deserialize;
use std::sync::Arc;

/// The `?range=<spec>&env=<name>` query pair shared by most routes.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    /// Range spec (`90d`, `Q1-2026`, ...).
    pub range: String,
    /// Environment name.
    #[serde(default = "default_env")]
    pub env: String,
}

fn default_env() -> String {
    "default".to_string()
}

/// Validate the query pair into a cache key. Unknown environments are
/// 404, malformed ranges 400.
pub(crate) fn resolve_key(ctx: &SharedContext, query: &KeyQuery) -> ApiResult<CacheKey> {
    let range = validate_range(&query.range)?;
    ctx.config.environment(&query.env)?;
    Ok(CacheKey::new(range, query.env.clone()))
}

/// Fetch the bundle for a key, applying the partial-artifact policy.
pub(crate) fn load_bundle(
    ctx: &SharedContext,
    key: &CacheKey,
) -> ApiResult<Arc<MetricsBundle>> {
    let bundle = ctx
        .cache
        .get(key)
        .ok_or_else(|| FlowError::NotFound(format!("no metrics artifact for {key}")))?;
    if bundle.partial && ctx.config.dashboard.refuse_partial {
        return Err(FlowError::NotFound(format!("artifact for {key} is partial")).into());
    }
    Ok(bundle)
}
