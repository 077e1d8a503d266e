//! `GET /api/metrics` — the dashboard's main payload.

use super::{load_bundle, resolve_key, KeyQuery};
use crate::context::SharedContext;
use crate::error::ApiResult;
use crate::middleware::perf::CacheHit;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsEnvelope<'a> {
    teams: &'a [flowmetric_types::TeamMetrics],
    persons: &'a [flowmetric_types::PersonMetrics],
    comparison: &'a [flowmetric_types::ComparisonRow],
    metadata: &'a flowmetric_types::MetricsMetadata,
    /// `ok` or `partial`; numeric fields that could not be computed are
    /// `null` in the payload itself.
    status: &'static str,
}

/// Serve the full bundle for `(range, env)`.
pub async fn get_metrics(
    State(ctx): State<SharedContext>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    let key = resolve_key(&ctx, &query)?;
    let bundle = load_bundle(&ctx, &key)?;

    let envelope = MetricsEnvelope {
        teams: &bundle.teams,
        persons: &bundle.persons,
        comparison: &bundle.comparison,
        metadata: &bundle.metadata,
        status: if bundle.partial { "partial" } else { "ok" },
    };
    let mut response = Json(serde_json::to_value(&envelope).map_err(flowmetric_error::FlowError::from)?)
        .into_response();
    response.extensions_mut().insert(CacheHit(true));
    Ok(response)
}
