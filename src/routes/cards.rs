use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    allocator, artifacts,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Card, MessageGroup, NewCard},
    render::{self, SlideContent},
    routes::groups::{load_group, to_iso},
    schema::{cards, message_groups},
    settings,
    state::AppState,
    swap, visibility,
};

#[derive(Serialize)]
pub struct CardResponse {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub sender_email: String,
    pub sender_name: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Card> for CardResponse {
    fn from(card: Card) -> Self {
        Self {
            id: card.id,
            message_group_id: card.message_group_id,
            sender_email: card.sender_email,
            sender_name: card.sender_name,
            recipient_email: card.recipient_email,
            recipient_name: card.recipient_name,
            body: card.body,
            created_at: to_iso(card.created_at),
            updated_at: to_iso(card.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct SendCardRequest {
    pub recipient_email: String,
    pub recipient_name: String,
    pub sender_name: String,
    pub body: String,
}

/// Cards are submitted into whichever group the form is currently open for,
/// after swap resolution for the recipient. The stored row never moves.
pub async fn send_card(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SendCardRequest>,
) -> AppResult<Json<CardResponse>> {
    let recipient_email = payload.recipient_email.trim().to_lowercase();
    if !recipient_email.contains('@') {
        return Err(AppError::bad_request(
            "recipient_email must be an email address",
        ));
    }
    if payload.recipient_name.trim().is_empty() || payload.sender_name.trim().is_empty() {
        return Err(AppError::bad_request("names must not be empty"));
    }
    if payload.body.trim().is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }

    let mut conn = state.db()?;

    let form_slug = settings::get(&mut conn, settings::FORM_GROUP)?;
    if settings::is_disabled(&form_slug) {
        return Err(AppError::unprocessable("the card form is closed"));
    }
    let open_group: MessageGroup = message_groups::table
        .filter(message_groups::slug.eq(&form_slug))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::unprocessable("the card form is closed"))?;

    let target_group = swap::effective_group(&mut conn, &recipient_email, &open_group)
        .map_err(AppError::from)?;

    let new_card = NewCard {
        id: Uuid::new_v4(),
        message_group_id: target_group.id,
        sender_email: user.email().to_string(),
        sender_name: payload.sender_name.trim().to_string(),
        recipient_email,
        recipient_name: payload.recipient_name.trim().to_string(),
        body: payload.body.trim().to_string(),
    };

    diesel::insert_into(cards::table)
        .values(&new_card)
        .execute(&mut conn)?;

    let card: Card = cards::table.find(new_card.id).first(&mut conn)?;
    Ok(Json(CardResponse::from(card)))
}

fn load_card(conn: &mut diesel::PgConnection, card_id: Uuid) -> AppResult<Card> {
    cards::table
        .find(card_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

/// Senders always see their own cards, hidden or not. Recipients see a card
/// only when the group is unhidden or an override grants them visibility.
pub async fn get_card(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(card_id): Path<Uuid>,
) -> AppResult<Json<CardResponse>> {
    let mut conn = state.db()?;
    let card = load_card(&mut conn, card_id)?;

    if user.is_admin() || card.sender_email == user.email() {
        return Ok(Json(CardResponse::from(card)));
    }

    if card.recipient_email != user.email() {
        return Err(AppError::not_found());
    }

    // Visibility follows the swap-resolved group, the same one bulk export
    // delivers the card under.
    let stored_group = load_group(&mut conn, card.message_group_id)?;
    let group = swap::effective_group(&mut conn, &card.recipient_email, &stored_group)
        .map_err(AppError::from)?;
    let has_override = visibility::has_override(&mut conn, user.email(), group.id)?;
    if !visibility::is_visible(group.hide_cards, has_override) {
        return Err(AppError::forbidden("cards in this group are hidden"));
    }

    Ok(Json(CardResponse::from(card)))
}

#[derive(Deserialize)]
pub struct UpdateCardRequest {
    pub recipient_name: Option<String>,
    pub body: Option<String>,
}

pub async fn update_card(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(card_id): Path<Uuid>,
    Json(payload): Json<UpdateCardRequest>,
) -> AppResult<Json<CardResponse>> {
    let mut conn = state.db()?;
    let card = load_card(&mut conn, card_id)?;

    if card.sender_email != user.email() && !user.is_admin() {
        return Err(AppError::forbidden("card belongs to another sender"));
    }

    let recipient_name = payload
        .recipient_name
        .map(|value| value.trim().to_string())
        .unwrap_or(card.recipient_name);
    let body = payload
        .body
        .map(|value| value.trim().to_string())
        .unwrap_or(card.body);
    if recipient_name.is_empty() || body.is_empty() {
        return Err(AppError::bad_request("fields must not be empty"));
    }

    diesel::update(cards::table.find(card_id))
        .set((
            cards::recipient_name.eq(recipient_name),
            cards::body.eq(body),
            cards::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    // Edits make every cached render of this card stale.
    artifacts::invalidate_card(&mut conn, state.storage.as_ref(), card_id)
        .await
        .map_err(AppError::from)?;

    let updated: Card = cards::table.find(card_id).first(&mut conn)?;
    Ok(Json(CardResponse::from(updated)))
}

pub async fn delete_card(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(card_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let card = load_card(&mut conn, card_id)?;

    if card.sender_email != user.email() && !user.is_admin() {
        return Err(AppError::forbidden("card belongs to another sender"));
    }

    artifacts::invalidate_card(&mut conn, state.storage.as_ref(), card_id)
        .await
        .map_err(AppError::from)?;
    diesel::delete(cards::table.find(card_id)).execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

/// The recipient's claim picks the template variant; no claim renders the
/// no-attachment variant 0.
fn template_variant_for(
    conn: &mut diesel::PgConnection,
    group_id: Uuid,
    recipient_email: &str,
) -> AppResult<i32> {
    let claim = allocator::find_claim(conn, recipient_email, group_id)?;
    let Some(claim) = claim else {
        return Ok(0);
    };

    let attachments = allocator::list_attachments(conn, group_id)?;
    let variant = attachments
        .iter()
        .position(|attachment| attachment.id == claim.attachment_id)
        .map(|index| index as i32 + 1)
        .unwrap_or(0);
    Ok(variant)
}

pub async fn card_pdf(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(card_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let card = load_card(&mut conn, card_id)?;
    let stored_group = load_group(&mut conn, card.message_group_id)?;
    // Swap resolution decides which group's hide flag, template, and claims
    // apply, matching what a bulk run of that group would render.
    let group = swap::effective_group(&mut conn, &card.recipient_email, &stored_group)
        .map_err(AppError::from)?;

    // Unlike the JSON view, hidden groups withhold the rendered card even
    // from its sender.
    if !user.is_admin() {
        if card.sender_email != user.email() && card.recipient_email != user.email() {
            return Err(AppError::not_found());
        }
        let has_override =
            visibility::has_override(&mut conn, &card.recipient_email, group.id)?;
        if !visibility::is_visible(group.hide_cards, has_override) {
            return Err(AppError::forbidden("cards in this group are hidden"));
        }
    }

    let variant = template_variant_for(&mut conn, group.id, &card.recipient_email)?;

    if let Some(artifact) = artifacts::lookup_card_artifact(&mut conn, card_id, variant)? {
        let bytes = state
            .storage
            .get_object(&artifact.storage_key)
            .await
            .map_err(AppError::from)?;
        return Ok(([(header::CONTENT_TYPE, artifact.content_type)], bytes));
    }

    let template = state
        .storage
        .get_object(&artifacts::template_key(group.id))
        .await
        .map_err(|_| AppError::unprocessable("no slide template configured for this group"))?;

    let slide = SlideContent {
        net_id: render::net_id(&card.recipient_email).to_string(),
        recipient_name: card.recipient_name.clone(),
        sender_name: card.sender_name.clone(),
        message: card.body.clone(),
        variant: variant as usize,
    };

    let (progress_tx, _progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let deck = state
        .renderer
        .render_deck(&template, &[slide], progress_tx)
        .await
        .map_err(AppError::from)?;
    let document = state
        .renderer
        .deck_to_document(&deck)
        .await
        .map_err(AppError::from)?;

    let content_type = state.renderer.document_content_type().to_string();
    let artifact = artifacts::store_card_artifact(
        &mut conn,
        state.storage.as_ref(),
        group.id,
        card_id,
        variant,
        document.clone(),
        &content_type,
    )
    .await
    .map_err(AppError::from)?;

    Ok(([(header::CONTENT_TYPE, artifact.content_type)], document))
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub group: Option<String>,
    pub q: Option<String>,
}

pub async fn list_cards(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<BrowseQuery>,
) -> AppResult<Json<Vec<CardResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let mut db_query = cards::table.into_boxed();

    if let Some(slug) = query.group.as_deref().filter(|slug| !slug.is_empty()) {
        let group: MessageGroup = message_groups::table
            .filter(message_groups::slug.eq(slug))
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
        db_query = db_query.filter(cards::message_group_id.eq(group.id));
    }

    if let Some(needle) = query.q.as_deref().filter(|needle| !needle.is_empty()) {
        let pattern = format!("%{}%", needle.replace('%', "\\%").replace('_', "\\_"));
        db_query = db_query.filter(
            cards::recipient_email
                .ilike(pattern.clone())
                .or(cards::recipient_name.ilike(pattern.clone()))
                .or(cards::sender_name.ilike(pattern.clone()))
                .or(cards::body.ilike(pattern)),
        );
    }

    let rows: Vec<Card> = db_query
        .order((cards::created_at.asc(), cards::id.asc()))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(CardResponse::from).collect()))
}
