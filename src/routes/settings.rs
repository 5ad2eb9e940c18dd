use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    settings,
    state::AppState,
};

#[derive(Serialize)]
pub struct SettingsResponse {
    pub form_group: String,
    pub attachment_group: String,
    pub swap_from: String,
    pub swap_to: String,
}

pub async fn list_settings(State(state): State<AppState>) -> AppResult<Json<SettingsResponse>> {
    let mut conn = state.db()?;
    Ok(Json(SettingsResponse {
        form_group: settings::get(&mut conn, settings::FORM_GROUP)?,
        attachment_group: settings::get(&mut conn, settings::ATTACHMENT_GROUP)?,
        swap_from: settings::get(&mut conn, settings::SWAP_FROM)?,
        swap_to: settings::get(&mut conn, settings::SWAP_TO)?,
    }))
}

#[derive(Deserialize)]
pub struct PutSettingRequest {
    pub value: String,
}

/// Settings hold group slugs (or the `none` sentinel) that gate the card
/// form, attachment claiming, and the swap window.
pub async fn put_setting(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
    Json(payload): Json<PutSettingRequest>,
) -> AppResult<Json<SettingsResponse>> {
    user.require_admin()?;

    if !settings::KNOWN_KEYS.contains(&key.as_str()) {
        return Err(AppError::not_found());
    }
    let value = payload.value.trim().to_lowercase();
    if value.is_empty() {
        return Err(AppError::bad_request("value must not be empty"));
    }

    let mut conn = state.db()?;
    settings::set(&mut conn, &key, &value)?;

    Ok(Json(SettingsResponse {
        form_group: settings::get(&mut conn, settings::FORM_GROUP)?,
        attachment_group: settings::get(&mut conn, settings::ATTACHMENT_GROUP)?,
        swap_from: settings::get(&mut conn, settings::SWAP_FROM)?,
        swap_to: settings::get(&mut conn, settings::SWAP_TO)?,
    }))
}
