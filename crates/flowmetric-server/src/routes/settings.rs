//! `POST /api/settings/weights` — runtime weight updates.

use crate::context::SharedContext;
use crate::error::ApiResult;
use axum::extract::State;
use axum::Json;
use flowmetric_error::FlowError;
use flowmetric_events::{Event, EventType};
use flowmetric_types::PerformanceWeights;
use serde_json::{json, Value};
use tracing::info;

/// Validate and install a new weight vector, announcing the change so
/// the cache drops score-bearing payloads.
pub async fn update_weights(
    State(ctx): State<SharedContext>,
    Json(weights): Json<PerformanceWeights>,
) -> ApiResult<Json<Value>> {
    weights
        .validate()
        .map_err(|e| FlowError::Validation(e.to_string()))?;

    *ctx.weights.write() = weights;
    ctx.bus
        .publish(Event::new(EventType::ConfigChanged).with_scope("performanceWeights"));
    info!("performance weights updated");
    Ok(Json(json!({ "updated": true })))
}
