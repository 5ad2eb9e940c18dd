use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    artifacts,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    jobs::{self, ExportFormat, ORDER_SUBMISSION},
    models::FulfillmentJob,
    routes::groups::{load_group, to_iso},
    state::AppState,
};

#[derive(Serialize)]
pub struct RunResponse {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub ordering: String,
    pub include_deck: bool,
    pub status: String,
    pub csv_status: String,
    pub deck_status: String,
    pub doc_status: String,
    pub deck_progress: i32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FulfillmentJob> for RunResponse {
    fn from(job: FulfillmentJob) -> Self {
        Self {
            id: job.id,
            message_group_id: job.message_group_id,
            ordering: job.ordering,
            include_deck: job.include_deck,
            status: job.status,
            csv_status: job.csv_status,
            deck_status: job.deck_status,
            doc_status: job.doc_status,
            deck_progress: job.deck_progress,
            last_error: job.last_error,
            created_at: to_iso(job.created_at),
            updated_at: to_iso(job.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct TriggerRunRequest {
    #[serde(default)]
    pub include_deck: bool,
    pub ordering: Option<String>,
}

/// Returns 202 with a fresh run, or 200 with the already-active run for the
/// group; triggering is never an error on account of a run in flight.
pub async fn trigger_run(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<TriggerRunRequest>,
) -> AppResult<(StatusCode, Json<RunResponse>)> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let group = load_group(&mut conn, group_id)?;

    let ordering = payload
        .ordering
        .unwrap_or_else(|| ORDER_SUBMISSION.to_string());

    let outcome = jobs::trigger_run(&mut conn, &group, payload.include_deck, &ordering)
        .map_err(AppError::from)?;

    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(RunResponse::from(outcome.job))))
}

pub async fn list_runs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<RunResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    let runs = jobs::list_runs(&mut conn, group_id)?;
    Ok(Json(runs.into_iter().map(RunResponse::from).collect()))
}

pub async fn get_run(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(run_id): Path<Uuid>,
) -> AppResult<Json<RunResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let run = jobs::find_run(&mut conn, run_id)?.ok_or_else(AppError::not_found)?;
    Ok(Json(RunResponse::from(run)))
}

pub async fn download_artifact(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((run_id, format)): Path<(Uuid, String)>,
) -> AppResult<impl IntoResponse> {
    user.require_admin()?;

    let format = ExportFormat::parse(&format)
        .ok_or_else(|| AppError::bad_request("unknown export format"))?;

    let mut conn = state.db()?;
    jobs::find_run(&mut conn, run_id)?.ok_or_else(AppError::not_found)?;

    let artifact = artifacts::lookup_bulk_artifact(&mut conn, run_id, format.as_str())?
        .ok_or_else(AppError::not_found)?;
    drop(conn);

    let bytes = state
        .storage
        .get_object(&artifact.storage_key)
        .await
        .map_err(AppError::from)?;

    let disposition = format!("attachment; filename=\"{}-{}\"", run_id, format.as_str());
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
