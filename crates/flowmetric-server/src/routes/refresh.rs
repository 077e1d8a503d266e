//! `GET /api/refresh` — kick a collection job out-of-band.

use super::{resolve_key, KeyQuery};
use crate::context::{JobStatus, SharedContext};
use crate::error::ApiResult;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use flowmetric_events::{Event, EventType};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

/// Accepts immediately with a job id; the job itself runs detached (no
/// request handler ever blocks on upstream services).
pub async fn refresh(
    State(ctx): State<SharedContext>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let key = resolve_key(&ctx, &query)?;
    let job_id = Uuid::new_v4();
    ctx.jobs.lock().insert(job_id, JobStatus::Running);

    // Drops the memory entry; the key stays absent until the job lands.
    ctx.bus.publish(
        Event::new(EventType::ManualRefresh).with_key(key.range.to_string(), &key.environment),
    );

    let config = ctx.effective_config();
    let job_ctx = ctx.clone();
    tokio::spawn(async move {
        let outcome = flowmetric_collector::run_collection_job(
            &config,
            key.range,
            &key.environment,
            &job_ctx.cache,
            &job_ctx.bus,
        )
        .await;
        let status = match outcome {
            Ok(outcome) => {
                info!(job = %job_id, partial = outcome.partial, "refresh job finished");
                JobStatus::Finished {
                    partial: outcome.partial,
                }
            }
            Err(e) => {
                error!(job = %job_id, error = %e, "refresh job failed");
                JobStatus::Failed {
                    error: e.error_code().to_string(),
                }
            }
        };
        job_ctx.jobs.lock().insert(job_id, status);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "status": "accepted" })),
    ))
}

/// `GET /api/refresh/{jobId}` — poll a refresh job.
pub async fn job_status(
    State(ctx): State<SharedContext>,
    axum::extract::Path(job_id): axum::extract::Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let jobs = ctx.jobs.lock();
    let status = jobs
        .get(&job_id)
        .ok_or_else(|| flowmetric_error::FlowError::NotFound(format!("job {job_id}")))?;
    Ok(Json(json!({ "jobId": job_id, "status": status })))
}
