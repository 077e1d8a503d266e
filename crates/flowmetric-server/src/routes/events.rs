//! `GET /api/events/recent` — bus introspection.

use crate::context::SharedContext;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// The retained event history, oldest first.
pub async fn recent(State(ctx): State<SharedContext>) -> Json<Value> {
    Json(json!({ "events": ctx.bus.recent() }))
}
