use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    artifacts,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    jobs::ALL_TIME_SLUG,
    models::{MessageGroup, NewMessageGroup},
    render::DeckTemplate,
    schema::message_groups,
    state::AppState,
};

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub(crate) fn load_group(
    conn: &mut diesel::PgConnection,
    group_id: Uuid,
) -> AppResult<MessageGroup> {
    message_groups::table
        .find(group_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

#[derive(Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub hide_cards: bool,
    pub created_at: String,
}

impl From<MessageGroup> for GroupResponse {
    fn from(group: MessageGroup) -> Self {
        Self {
            id: group.id,
            slug: group.slug,
            display_name: group.display_name,
            hide_cards: group.hide_cards,
            created_at: to_iso(group.created_at),
        }
    }
}

pub async fn list_groups(State(state): State<AppState>) -> AppResult<Json<Vec<GroupResponse>>> {
    let mut conn = state.db()?;
    let groups: Vec<MessageGroup> = message_groups::table
        .order(message_groups::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(groups.into_iter().map(GroupResponse::from).collect()))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<GroupResponse>> {
    let mut conn = state.db()?;
    let group = load_group(&mut conn, group_id)?;
    Ok(Json(GroupResponse::from(group)))
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub hide_cards: bool,
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateGroupRequest>,
) -> AppResult<Json<GroupResponse>> {
    user.require_admin()?;

    let slug = payload.slug.trim().to_lowercase();
    if slug.is_empty() {
        return Err(AppError::bad_request("slug must not be empty"));
    }
    if slug == ALL_TIME_SLUG {
        return Err(AppError::bad_request("slug is reserved"));
    }

    let mut conn = state.db()?;
    let new_group = NewMessageGroup {
        id: Uuid::new_v4(),
        slug,
        display_name: payload.display_name.trim().to_string(),
        hide_cards: payload.hide_cards,
    };

    match diesel::insert_into(message_groups::table)
        .values(&new_group)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("group slug already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let group: MessageGroup = message_groups::table.find(new_group.id).first(&mut conn)?;
    Ok(Json(GroupResponse::from(group)))
}

#[derive(Deserialize)]
pub struct UpdateGroupRequest {
    pub display_name: Option<String>,
    pub hide_cards: Option<bool>,
}

pub async fn update_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<UpdateGroupRequest>,
) -> AppResult<Json<GroupResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let group = load_group(&mut conn, group_id)?;

    let display_name = payload
        .display_name
        .map(|value| value.trim().to_string())
        .unwrap_or(group.display_name);
    if display_name.is_empty() {
        return Err(AppError::bad_request("display_name must not be empty"));
    }
    let hide_cards = payload.hide_cards.unwrap_or(group.hide_cards);

    diesel::update(message_groups::table.find(group_id))
        .set((
            message_groups::display_name.eq(display_name),
            message_groups::hide_cards.eq(hide_cards),
            message_groups::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: MessageGroup = message_groups::table.find(group_id).first(&mut conn)?;
    Ok(Json(GroupResponse::from(updated)))
}

pub async fn delete_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    match diesel::delete(message_groups::table.find(group_id)).execute(&mut conn) {
        Ok(0) => Err(AppError::not_found()),
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => Err(AppError::conflict(
            "group still has cards, attachments, or runs",
        )),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;
    drop(conn);

    let bytes = state
        .storage
        .get_object(&artifacts::template_key(group_id))
        .await
        .map_err(|_| AppError::not_found())?;

    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}

/// Replacing a template invalidates every cached single-card render in the
/// group; bulk artifacts from past runs are kept as historical snapshots.
pub async fn put_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
    body: axum::body::Bytes,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    DeckTemplate::parse(&body).map_err(|err| AppError::bad_request(err.to_string()))?;

    state
        .storage
        .put_object(
            &artifacts::template_key(group_id),
            body.to_vec(),
            Some("application/json".to_string()),
            None,
        )
        .await
        .map_err(AppError::from)?;

    artifacts::invalidate_group_cards(&mut conn, state.storage.as_ref(), group_id)
        .await
        .map_err(AppError::from)?;

    Ok(StatusCode::NO_CONTENT)
}
