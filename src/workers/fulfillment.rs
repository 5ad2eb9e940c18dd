//! Executes a reserved fulfillment run.
//!
//! The CSV renders first and is marked done as soon as it uploads, so it
//! stays downloadable even if the deck later fails. The document is derived
//! from the deck, so a deck failure fails the document too.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    allocator, artifacts,
    jobs::{
        self, ExportFormat, FORMAT_DONE, FORMAT_FAILED, FORMAT_RENDERING, ORDER_ALPHABETICAL,
    },
    models::{Card, FulfillmentJob, MessageGroup},
    render::{self, CsvRow, SlideContent},
    schema::message_groups,
    state::AppState,
    swap,
};

use diesel::prelude::*;

pub async fn execute(state: Arc<AppState>, run: &FulfillmentJob) -> Result<()> {
    let mut conn = state
        .db()
        .map_err(|_| anyhow!("database pool exhausted"))?;

    let group: MessageGroup = message_groups::table
        .find(run.message_group_id)
        .first(&mut conn)
        .context("run references a missing group")?;

    let mut cards = swap::effective_member_cards(&mut conn, &group)
        .map_err(|err| anyhow!("failed to enumerate member cards: {err}"))?;
    order_cards(&mut cards, &run.ordering);

    // Variant 1..N follows attachment configuration order; a recipient with
    // no claim gets variant 0.
    let attachments = allocator::list_attachments(&mut conn, group.id)?;
    let variant_by_attachment: HashMap<Uuid, usize> = attachments
        .iter()
        .enumerate()
        .map(|(index, attachment)| (attachment.id, index + 1))
        .collect();
    let claims = allocator::list_claims(&mut conn, group.id)?;
    let claim_by_recipient: HashMap<&str, (Uuid, &str)> = claims
        .iter()
        .map(|(claim, name)| {
            (
                claim.recipient_email.as_str(),
                (claim.attachment_id, name.as_str()),
            )
        })
        .collect();

    render_csv(&state, &mut conn, run, &group, &cards, &claim_by_recipient).await;

    if run.include_deck {
        render_deck_and_document(
            &state,
            &mut conn,
            run,
            &group,
            &cards,
            &claim_by_recipient,
            &variant_by_attachment,
        )
        .await;
    }

    let finished = jobs::finalize_run(&mut conn, run.id)?;
    info!(run_id = %run.id, status = %finished.status, "run finished");
    Ok(())
}

async fn render_csv(
    state: &AppState,
    conn: &mut diesel::PgConnection,
    run: &FulfillmentJob,
    group: &MessageGroup,
    cards: &[Card],
    claim_by_recipient: &HashMap<&str, (Uuid, &str)>,
) {
    let set_status = |conn: &mut diesel::PgConnection, status: &str, error: Option<&str>| {
        if let Err(err) = jobs::set_format_status(conn, run.id, ExportFormat::Csv, status, error) {
            warn!(run_id = %run.id, error = %err, "failed to record csv status");
        }
    };

    set_status(conn, FORMAT_RENDERING, None);

    let rows: Vec<CsvRow> = cards
        .iter()
        .map(|card| CsvRow {
            id: card.id,
            created_at: card.created_at,
            group_slug: group.slug.clone(),
            sender_email: card.sender_email.clone(),
            sender_name: card.sender_name.clone(),
            recipient_email: card.recipient_email.clone(),
            recipient_name: card.recipient_name.clone(),
            body: card.body.clone(),
            attachment: claim_by_recipient
                .get(card.recipient_email.as_str())
                .map(|(_, name)| name.to_string()),
        })
        .collect();

    let csv = render::cards_to_csv(&rows).into_bytes();
    match artifacts::store_bulk_artifact(
        conn,
        state.storage.as_ref(),
        group.id,
        run.id,
        ExportFormat::Csv.as_str(),
        csv,
        "text/csv; charset=utf-8",
    )
    .await
    {
        Ok(_) => set_status(conn, FORMAT_DONE, None),
        Err(err) => set_status(conn, FORMAT_FAILED, Some(&err.to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn render_deck_and_document(
    state: &AppState,
    conn: &mut diesel::PgConnection,
    run: &FulfillmentJob,
    group: &MessageGroup,
    cards: &[Card],
    claim_by_recipient: &HashMap<&str, (Uuid, &str)>,
    variant_by_attachment: &HashMap<Uuid, usize>,
) {
    let set_status =
        |conn: &mut diesel::PgConnection, format: ExportFormat, status: &str, error: Option<&str>| {
            if let Err(err) = jobs::set_format_status(conn, run.id, format, status, error) {
                warn!(run_id = %run.id, error = %err, "failed to record format status");
            }
        };

    set_status(conn, ExportFormat::Deck, FORMAT_RENDERING, None);

    let template = match state
        .storage
        .get_object(&artifacts::template_key(group.id))
        .await
    {
        Ok(bytes) => bytes,
        Err(err) => {
            let reason = format!("no slide template configured: {err}");
            set_status(conn, ExportFormat::Deck, FORMAT_FAILED, Some(&reason));
            set_status(
                conn,
                ExportFormat::Document,
                FORMAT_FAILED,
                Some("deck unavailable"),
            );
            return;
        }
    };

    let slides: Vec<SlideContent> = cards
        .iter()
        .map(|card| {
            let variant = claim_by_recipient
                .get(card.recipient_email.as_str())
                .and_then(|(attachment_id, _)| variant_by_attachment.get(attachment_id))
                .copied()
                .unwrap_or(0);
            SlideContent {
                net_id: render::net_id(&card.recipient_email).to_string(),
                recipient_name: card.recipient_name.clone(),
                sender_name: card.sender_name.clone(),
                message: card.body.clone(),
                variant,
            }
        })
        .collect();

    let (progress_tx, mut progress_rx) = unbounded_channel();
    let progress_pool = state.pool.clone();
    let run_id = run.id;
    let progress_task = tokio::spawn(async move {
        while let Some(percent) = progress_rx.recv().await {
            if let Ok(mut conn) = progress_pool.get() {
                if let Err(err) = jobs::set_deck_progress(&mut conn, run_id, percent as i32) {
                    warn!(run_id = %run_id, error = %err, "failed to record deck progress");
                }
            }
        }
    });

    let deck_result = state
        .renderer
        .render_deck(&template, &slides, progress_tx)
        .await;
    let _ = progress_task.await;

    let deck = match deck_result {
        Ok(deck) => deck,
        Err(err) => {
            set_status(conn, ExportFormat::Deck, FORMAT_FAILED, Some(&err.to_string()));
            set_status(
                conn,
                ExportFormat::Document,
                FORMAT_FAILED,
                Some("deck unavailable"),
            );
            return;
        }
    };

    match artifacts::store_bulk_artifact(
        conn,
        state.storage.as_ref(),
        group.id,
        run.id,
        ExportFormat::Deck.as_str(),
        deck.clone(),
        state.renderer.deck_content_type(),
    )
    .await
    {
        Ok(_) => set_status(conn, ExportFormat::Deck, FORMAT_DONE, None),
        Err(err) => {
            set_status(conn, ExportFormat::Deck, FORMAT_FAILED, Some(&err.to_string()));
            set_status(
                conn,
                ExportFormat::Document,
                FORMAT_FAILED,
                Some("deck unavailable"),
            );
            return;
        }
    }

    set_status(conn, ExportFormat::Document, FORMAT_RENDERING, None);

    let document = match state.renderer.deck_to_document(&deck).await {
        Ok(document) => document,
        Err(err) => {
            set_status(
                conn,
                ExportFormat::Document,
                FORMAT_FAILED,
                Some(&err.to_string()),
            );
            return;
        }
    };

    match artifacts::store_bulk_artifact(
        conn,
        state.storage.as_ref(),
        group.id,
        run.id,
        ExportFormat::Document.as_str(),
        document,
        state.renderer.document_content_type(),
    )
    .await
    {
        Ok(_) => set_status(conn, ExportFormat::Document, FORMAT_DONE, None),
        Err(err) => set_status(
            conn,
            ExportFormat::Document,
            FORMAT_FAILED,
            Some(&err.to_string()),
        ),
    }
}

/// Submission order is creation time; alphabetical sorts by recipient name
/// case-insensitively with submission order breaking ties.
pub fn order_cards(cards: &mut [Card], ordering: &str) {
    if ordering == ORDER_ALPHABETICAL {
        cards.sort_by(|a, b| {
            a.recipient_name
                .to_lowercase()
                .cmp(&b.recipient_name.to_lowercase())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
    } else {
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    }
}

#[cfg(test)]
mod tests {
    use super::order_cards;
    use crate::jobs::{ORDER_ALPHABETICAL, ORDER_SUBMISSION};
    use crate::models::Card;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn card(recipient_name: &str, day: u32) -> Card {
        let at = NaiveDate::from_ymd_opt(2025, 4, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Card {
            id: Uuid::new_v4(),
            message_group_id: Uuid::nil(),
            sender_email: "sender@example.edu".to_string(),
            sender_name: "Sender".to_string(),
            recipient_email: "r@example.edu".to_string(),
            recipient_name: recipient_name.to_string(),
            body: "hi".to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn submission_order_is_creation_time() {
        let mut cards = vec![card("Zoe", 3), card("Abe", 1), card("Mia", 2)];
        order_cards(&mut cards, ORDER_SUBMISSION);
        let names: Vec<&str> = cards.iter().map(|c| c.recipient_name.as_str()).collect();
        assert_eq!(names, ["Abe", "Mia", "Zoe"]);
    }

    #[test]
    fn alphabetical_is_case_insensitive_with_submission_ties() {
        let mut cards = vec![card("zoe", 1), card("Abe", 3), card("abe", 2)];
        order_cards(&mut cards, ORDER_ALPHABETICAL);
        let names: Vec<&str> = cards.iter().map(|c| c.recipient_name.as_str()).collect();
        assert_eq!(names, ["abe", "Abe", "zoe"]);
    }
}
