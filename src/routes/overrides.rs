use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::VisibilityOverride,
    routes::groups::{load_group, to_iso},
    state::AppState,
    visibility,
};

#[derive(Serialize)]
pub struct OverrideResponse {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
    pub created_at: String,
}

impl From<VisibilityOverride> for OverrideResponse {
    fn from(value: VisibilityOverride) -> Self {
        Self {
            id: value.id,
            recipient_email: value.recipient_email,
            message_group_id: value.message_group_id,
            created_at: to_iso(value.created_at),
        }
    }
}

pub async fn list_overrides(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<OverrideResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let all = visibility::list_overrides(&mut conn)?;
    Ok(Json(all.into_iter().map(OverrideResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateOverrideRequest {
    pub recipient_email: String,
    pub message_group_id: Uuid,
}

pub async fn create_override(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOverrideRequest>,
) -> AppResult<Json<OverrideResponse>> {
    user.require_admin()?;

    let recipient = payload.recipient_email.trim().to_lowercase();
    if recipient.is_empty() {
        return Err(AppError::bad_request("recipient_email must not be empty"));
    }

    let mut conn = state.db()?;
    load_group(&mut conn, payload.message_group_id)?;

    let created = visibility::add_override(&mut conn, &recipient, payload.message_group_id)?;
    Ok(Json(OverrideResponse::from(created)))
}

pub async fn remove_override(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(override_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    visibility::remove_override(&mut conn, override_id)?;
    Ok(StatusCode::NO_CONTENT)
}
