//! `GET /api/teams` — the configured fan-out plan, for the dashboard's
//! team picker.

use crate::context::SharedContext;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Configured teams with their members and repositories.
pub async fn list(State(ctx): State<SharedContext>) -> Json<Value> {
    let teams: Vec<Value> = ctx
        .config
        .teams
        .iter()
        .map(|team| {
            json!({
                "name": team.name,
                "repositories": team.repositories,
                "members": team
                    .members
                    .iter()
                    .map(|m| json!({ "name": m.name, "sourceLogin": m.source_login }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({ "teams": teams }))
}
