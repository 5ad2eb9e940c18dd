use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    artifacts,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::SwapPreference,
    routes::groups::to_iso,
    state::AppState,
    swap,
};

#[derive(Serialize)]
pub struct SwapPreferenceResponse {
    pub id: Uuid,
    pub recipient_email: String,
    pub from_group_id: Uuid,
    pub to_group_id: Uuid,
    pub created_at: String,
}

impl From<SwapPreference> for SwapPreferenceResponse {
    fn from(preference: SwapPreference) -> Self {
        Self {
            id: preference.id,
            recipient_email: preference.recipient_email,
            from_group_id: preference.from_group_id,
            to_group_id: preference.to_group_id,
            created_at: to_iso(preference.created_at),
        }
    }
}

pub async fn list_preferences(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<SwapPreferenceResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let all = swap::list_preferences(&mut conn)?;
    Ok(Json(
        all.into_iter().map(SwapPreferenceResponse::from).collect(),
    ))
}

/// Opt-in applies to the currently configured swap window; the source and
/// destination groups come from settings, not the request.
pub async fn create_preference(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<SwapPreferenceResponse>> {
    let mut conn = state.db()?;

    let preference = swap::create_preference(&mut conn, user.email()).map_err(AppError::from)?;

    // Resolution moved this recipient's cards to the destination group, so
    // any cached renders in the source group are stale.
    artifacts::invalidate_recipient_cards(
        &mut conn,
        state.storage.as_ref(),
        user.email(),
        preference.from_group_id,
    )
    .await
    .map_err(AppError::from)?;

    Ok(Json(SwapPreferenceResponse::from(preference)))
}

pub async fn delete_preference(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(preference_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let preference = swap::find_preference(&mut conn, preference_id)?
        .ok_or_else(AppError::not_found)?;
    if preference.recipient_email != user.email() && !user.is_admin() {
        return Err(AppError::forbidden("preference belongs to another recipient"));
    }

    let removed = swap::delete_preference(&mut conn, preference_id).map_err(AppError::from)?;

    artifacts::invalidate_recipient_cards(
        &mut conn,
        state.storage.as_ref(),
        &removed.recipient_email,
        removed.from_group_id,
    )
    .await
    .map_err(AppError::from)?;

    Ok(StatusCode::NO_CONTENT)
}
