use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    allocator::{self, InventoryViolation},
    artifacts,
    auth::AuthenticatedUser,
    error::{AppError, AppResult, FulfillmentError},
    models::Attachment,
    routes::groups::{load_group, to_iso},
    schema::attachment_claims,
    settings,
    state::AppState,
};

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub name: String,
    pub remaining: i32,
    pub capacity: i32,
}

impl From<Attachment> for AttachmentResponse {
    fn from(attachment: Attachment) -> Self {
        Self {
            id: attachment.id,
            message_group_id: attachment.message_group_id,
            name: attachment.name,
            remaining: attachment.remaining,
            capacity: attachment.capacity,
        }
    }
}

pub async fn list_attachments(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<AttachmentResponse>>> {
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    let all = allocator::list_attachments(&mut conn, group_id)?;
    Ok(Json(all.into_iter().map(AttachmentResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateAttachmentRequest {
    pub name: String,
    pub capacity: i32,
}

pub async fn create_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<CreateAttachmentRequest>,
) -> AppResult<Json<AttachmentResponse>> {
    user.require_admin()?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.capacity < 0 {
        return Err(AppError::bad_request("capacity must not be negative"));
    }

    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    let attachment = allocator::add_attachment(&mut conn, group_id, name, payload.capacity)
        .map_err(AppError::from)?;
    Ok(Json(AttachmentResponse::from(attachment)))
}

pub async fn delete_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(attachment_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    match allocator::delete_attachment(&mut conn, attachment_id) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        // Active claims block deletion; this is a conflict, not a bad target.
        Err(FulfillmentError::InvalidTarget(reason)) => Err(AppError::conflict(reason)),
        Err(err) => Err(AppError::from(err)),
    }
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
    pub attachment_id: Uuid,
    pub attachment_name: String,
    pub created_at: String,
}

pub async fn list_claims(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<ClaimResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    let claims = allocator::list_claims(&mut conn, group_id)?;
    Ok(Json(
        claims
            .into_iter()
            .map(|(claim, attachment_name)| ClaimResponse {
                id: claim.id,
                recipient_email: claim.recipient_email,
                message_group_id: claim.message_group_id,
                attachment_id: claim.attachment_id,
                attachment_name,
                created_at: to_iso(claim.created_at),
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct CreateClaimRequest {
    pub message_group_id: Uuid,
    pub attachment_id: Uuid,
}

/// Recipients claim for themselves, and only while the claiming window is
/// open for the target group.
pub async fn create_claim(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateClaimRequest>,
) -> AppResult<Json<ClaimResponse>> {
    let mut conn = state.db()?;
    let group = load_group(&mut conn, payload.message_group_id)?;

    let open_slug = settings::get(&mut conn, settings::ATTACHMENT_GROUP)?;
    if settings::is_disabled(&open_slug) || open_slug != group.slug {
        return Err(AppError::unprocessable(
            "attachment claiming is not open for this group",
        ));
    }

    let claim = allocator::claim(
        &mut conn,
        user.email(),
        payload.message_group_id,
        payload.attachment_id,
    )
    .map_err(AppError::from)?;

    // The claim picks the card's template variant, so cached renders for
    // this recipient are stale now.
    artifacts::invalidate_recipient_cards(
        &mut conn,
        state.storage.as_ref(),
        user.email(),
        payload.message_group_id,
    )
    .await
    .map_err(AppError::from)?;

    let attachment_name = crate::schema::attachments::table
        .find(claim.attachment_id)
        .select(crate::schema::attachments::name)
        .first(&mut conn)?;

    Ok(Json(ClaimResponse {
        id: claim.id,
        recipient_email: claim.recipient_email,
        message_group_id: claim.message_group_id,
        attachment_id: claim.attachment_id,
        attachment_name,
        created_at: to_iso(claim.created_at),
    }))
}

pub async fn release_claim(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(claim_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let claim: crate::models::AttachmentClaim = attachment_claims::table
        .find(claim_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if claim.recipient_email != user.email() && !user.is_admin() {
        return Err(AppError::forbidden("claim belongs to another recipient"));
    }

    let recipient_email = claim.recipient_email.clone();
    let message_group_id = claim.message_group_id;

    allocator::release(&mut conn, claim_id).map_err(AppError::from)?;

    artifacts::invalidate_recipient_cards(
        &mut conn,
        state.storage.as_ref(),
        &recipient_email,
        message_group_id,
    )
    .await
    .map_err(AppError::from)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct InventoryCheckResponse {
    pub ok: bool,
    pub violations: Vec<InventoryViolation>,
}

pub async fn inventory_check(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<InventoryCheckResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    load_group(&mut conn, group_id)?;

    let violations = allocator::verify_inventory(&mut conn, group_id)?;
    Ok(Json(InventoryCheckResponse {
        ok: violations.is_empty(),
        violations,
    }))
}
