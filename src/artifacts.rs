//! Artifact cache.
//!
//! Rendered outputs live in object storage; rows here record what exists so
//! read paths can serve a cached render instead of re-rendering. Single-card
//! artifacts are keyed by `(card_id, template_variant)` and invalidated when
//! the card or its group template changes. Bulk artifacts are keyed by
//! `(job_id, format)` and are immutable snapshots of the run that produced
//! them.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::FulfillmentError;
use crate::models::{Artifact, NewArtifact};
use crate::schema::artifacts;
use crate::storage::ObjectStorage;

pub const KIND_CARD_PDF: &str = "card_pdf";
pub const KIND_BULK: &str = "bulk";

pub fn card_artifact_key(card_id: Uuid, template_variant: i32) -> String {
    format!("cards/{card_id}/variant-{template_variant}")
}

pub fn bulk_artifact_key(job_id: Uuid, format: &str) -> String {
    format!("runs/{job_id}/{format}")
}

/// Slide templates are plain objects, not artifacts: replacing one does not
/// version it, it just invalidates the group's cached card renders.
pub fn template_key(message_group_id: Uuid) -> String {
    format!("templates/{message_group_id}")
}

fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Uploads a single-card render and records it, replacing any previous
/// artifact for the same card and variant.
pub async fn store_card_artifact(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    message_group_id: Uuid,
    card_id: Uuid,
    template_variant: i32,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<Artifact, FulfillmentError> {
    let storage_key = card_artifact_key(card_id, template_variant);
    let checksum = checksum_hex(&bytes);
    let size_bytes = bytes.len() as i64;

    storage
        .put_object(&storage_key, bytes, Some(content_type.to_string()), None)
        .await
        .map_err(|err| FulfillmentError::RenderFailure(format!("artifact upload failed: {err}")))?;

    let new_artifact = NewArtifact {
        id: Uuid::new_v4(),
        kind: KIND_CARD_PDF.to_string(),
        message_group_id,
        card_id: Some(card_id),
        template_variant: Some(template_variant),
        job_id: None,
        format: None,
        storage_key,
        content_type: content_type.to_string(),
        size_bytes,
        checksum,
    };

    conn.transaction(|conn| {
        diesel::delete(
            artifacts::table
                .filter(artifacts::card_id.eq(card_id))
                .filter(artifacts::template_variant.eq(template_variant)),
        )
        .execute(conn)?;

        diesel::insert_into(artifacts::table)
            .values(&new_artifact)
            .execute(conn)?;

        artifacts::table.find(new_artifact.id).first(conn)
    })
    .map_err(FulfillmentError::from)
}

/// Uploads a bulk-run output and records it. Bulk artifacts are written once
/// per run and never replaced; a new run gets a new job id and new keys.
pub async fn store_bulk_artifact(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    message_group_id: Uuid,
    job_id: Uuid,
    format: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<Artifact, FulfillmentError> {
    let storage_key = bulk_artifact_key(job_id, format);
    let checksum = checksum_hex(&bytes);
    let size_bytes = bytes.len() as i64;

    storage
        .put_object(&storage_key, bytes, Some(content_type.to_string()), None)
        .await
        .map_err(|err| FulfillmentError::RenderFailure(format!("artifact upload failed: {err}")))?;

    let new_artifact = NewArtifact {
        id: Uuid::new_v4(),
        kind: KIND_BULK.to_string(),
        message_group_id,
        card_id: None,
        template_variant: None,
        job_id: Some(job_id),
        format: Some(format.to_string()),
        storage_key,
        content_type: content_type.to_string(),
        size_bytes,
        checksum,
    };

    diesel::insert_into(artifacts::table)
        .values(&new_artifact)
        .execute(conn)?;

    let artifact = artifacts::table.find(new_artifact.id).first(conn)?;
    Ok(artifact)
}

pub fn lookup_card_artifact(
    conn: &mut PgConnection,
    card_id: Uuid,
    template_variant: i32,
) -> QueryResult<Option<Artifact>> {
    artifacts::table
        .filter(artifacts::card_id.eq(card_id))
        .filter(artifacts::template_variant.eq(template_variant))
        .first(conn)
        .optional()
}

pub fn lookup_bulk_artifact(
    conn: &mut PgConnection,
    job_id: Uuid,
    format: &str,
) -> QueryResult<Option<Artifact>> {
    artifacts::table
        .filter(artifacts::job_id.eq(job_id))
        .filter(artifacts::format.eq(format))
        .first(conn)
        .optional()
}

pub fn list_bulk_artifacts(conn: &mut PgConnection, job_id: Uuid) -> QueryResult<Vec<Artifact>> {
    artifacts::table
        .filter(artifacts::job_id.eq(job_id))
        .order(artifacts::created_at.asc())
        .load(conn)
}

/// Drops all cached renders of a card. Called after a card edit.
pub async fn invalidate_card(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    card_id: Uuid,
) -> Result<usize, FulfillmentError> {
    let stale: Vec<Artifact> = artifacts::table
        .filter(artifacts::card_id.eq(card_id))
        .load(conn)?;

    delete_artifacts(conn, storage, stale).await
}

/// Drops cached single-card renders for every card in a group. Called after a
/// template change. Bulk artifacts are left alone.
pub async fn invalidate_group_cards(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    message_group_id: Uuid,
) -> Result<usize, FulfillmentError> {
    let stale: Vec<Artifact> = artifacts::table
        .filter(artifacts::message_group_id.eq(message_group_id))
        .filter(artifacts::kind.eq(KIND_CARD_PDF))
        .load(conn)?;

    delete_artifacts(conn, storage, stale).await
}

/// Drops cached renders of a recipient's cards in a group. Called when a
/// claim changes, since the claim picks the template variant.
pub async fn invalidate_recipient_cards(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    recipient_email: &str,
    message_group_id: Uuid,
) -> Result<usize, FulfillmentError> {
    use crate::schema::cards;

    let card_ids: Vec<Uuid> = cards::table
        .filter(cards::recipient_email.eq(recipient_email))
        .filter(cards::message_group_id.eq(message_group_id))
        .select(cards::id)
        .load(conn)?;

    let stale: Vec<Artifact> = artifacts::table
        .filter(artifacts::card_id.eq_any(card_ids))
        .load(conn)?;

    delete_artifacts(conn, storage, stale).await
}

async fn delete_artifacts(
    conn: &mut PgConnection,
    storage: &dyn ObjectStorage,
    stale: Vec<Artifact>,
) -> Result<usize, FulfillmentError> {
    let count = stale.len();
    for artifact in stale {
        // The row goes first: a dangling object is harmless, a dangling row
        // would serve a missing download.
        diesel::delete(artifacts::table.find(artifact.id)).execute(conn)?;
        if let Err(err) = storage.delete_object(&artifact.storage_key).await {
            tracing::warn!(key = %artifact.storage_key, error = %err, "failed to delete stale artifact object");
        }
    }
    Ok(count)
}
