//! `GET /api/export/...` — CSV and JSON exports.

use super::{load_bundle, resolve_key, KeyQuery};
use crate::context::SharedContext;
use crate::error::ApiResult;
use crate::export as csv_export;
use crate::middleware::validate::{validate_login, validate_team_name};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use flowmetric_error::FlowError;
use serde_json::json;

enum Format {
    Csv,
    Json,
}

fn parse_format(raw: &str) -> ApiResult<Format> {
    match raw {
        "csv" => Ok(Format::Csv),
        "json" => Ok(Format::Json),
        other => Err(FlowError::Validation(format!("unknown export format {other:?}")).into()),
    }
}

fn csv_response(name: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}.csv\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn json_response(payload: serde_json::Value) -> Response {
    axum::Json(payload).into_response()
}

/// `GET /api/export/team/{teamName}/{csv|json}`.
pub async fn team(
    State(ctx): State<SharedContext>,
    Path((team_name, format)): Path<(String, String)>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    validate_team_name(&team_name)?;
    let format = parse_format(&format)?;
    let bundle = load_bundle(&ctx, &resolve_key(&ctx, &query)?)?;

    let team = bundle
        .teams
        .iter()
        .find(|t| t.team == team_name)
        .ok_or_else(|| FlowError::NotFound(format!("team {team_name:?}")))?;

    Ok(match format {
        Format::Csv => csv_response(&format!("team_{team_name}"), csv_export::team_csv(team)?),
        Format::Json => json_response(json!({
            "team": team,
            "metadata": bundle.metadata,
        })),
    })
}

/// `GET /api/export/person/{login}/{csv|json}`.
pub async fn person(
    State(ctx): State<SharedContext>,
    Path((login, format)): Path<(String, String)>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    validate_login(&login)?;
    let format = parse_format(&format)?;
    let bundle = load_bundle(&ctx, &resolve_key(&ctx, &query)?)?;

    let person = bundle
        .persons
        .iter()
        .find(|p| p.login == login)
        .ok_or_else(|| FlowError::NotFound(format!("person {login:?}")))?;

    Ok(match format {
        Format::Csv => csv_response(&format!("person_{login}"), csv_export::person_csv(person)?),
        Format::Json => json_response(json!({
            "person": person,
            "metadata": bundle.metadata,
        })),
    })
}

/// `GET /api/export/comparison/{csv|json}`.
pub async fn comparison(
    State(ctx): State<SharedContext>,
    Path(format): Path<String>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    let format = parse_format(&format)?;
    let bundle = load_bundle(&ctx, &resolve_key(&ctx, &query)?)?;

    Ok(match format {
        Format::Csv => csv_response("comparison", csv_export::comparison_csv(&bundle.comparison)?),
        Format::Json => json_response(json!({
            "comparison": bundle.comparison,
            "metadata": bundle.metadata,
        })),
    })
}

/// `GET /api/export/team-members/{teamName}/{csv|json}`.
pub async fn team_members(
    State(ctx): State<SharedContext>,
    Path((team_name, format)): Path<(String, String)>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    validate_team_name(&team_name)?;
    let format = parse_format(&format)?;
    ctx.config
        .team(&team_name)
        .ok_or_else(|| FlowError::NotFound(format!("team {team_name:?}")))?;
    let bundle = load_bundle(&ctx, &resolve_key(&ctx, &query)?)?;

    let members: Vec<&flowmetric_types::PersonMetrics> = bundle
        .persons
        .iter()
        .filter(|p| p.team == team_name)
        .collect();

    Ok(match format {
        Format::Csv => csv_response(
            &format!("team_members_{team_name}"),
            csv_export::team_members_csv(&members)?,
        ),
        Format::Json => json_response(json!({
            "members": members,
            "metadata": bundle.metadata,
        })),
    })
}
