//! Attachment inventory and claims.
//!
//! Claims and the per-attachment counter are updated in one transaction with
//! a conditional decrement, so two concurrent claims for the last unit
//! resolve to exactly one success and one `Exhausted`.

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::FulfillmentError;
use crate::models::{Attachment, AttachmentClaim, NewAttachment, NewAttachmentClaim};
use crate::schema::{attachment_claims, attachments};

pub fn claim(
    conn: &mut PgConnection,
    recipient_email: &str,
    message_group_id: Uuid,
    attachment_id: Uuid,
) -> Result<AttachmentClaim, FulfillmentError> {
    conn.transaction(|conn| {
        let attachment: Attachment = attachments::table
            .find(attachment_id)
            .first(conn)
            .optional()?
            .ok_or(FulfillmentError::NotFound)?;

        if attachment.message_group_id != message_group_id {
            return Err(FulfillmentError::NotFound);
        }

        let existing: Option<AttachmentClaim> = attachment_claims::table
            .filter(attachment_claims::recipient_email.eq(recipient_email))
            .filter(attachment_claims::message_group_id.eq(message_group_id))
            .first(conn)
            .optional()?;

        if let Some(existing) = existing {
            if existing.attachment_id == attachment_id {
                // Re-claiming the same attachment is a no-op success.
                return Ok(existing);
            }
            return Err(FulfillmentError::AlreadyClaimed);
        }

        let decremented = diesel::update(
            attachments::table
                .find(attachment_id)
                .filter(attachments::remaining.gt(0)),
        )
        .set((
            attachments::remaining.eq(attachments::remaining - 1),
            attachments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

        if decremented == 0 {
            return Err(FulfillmentError::Exhausted(attachment.name));
        }

        let new_claim = NewAttachmentClaim {
            id: Uuid::new_v4(),
            recipient_email: recipient_email.to_string(),
            message_group_id,
            attachment_id,
        };

        match diesel::insert_into(attachment_claims::table)
            .values(&new_claim)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                // Lost a race against a concurrent claim by the same
                // recipient; rolling back restores the counter.
                return Err(FulfillmentError::AlreadyClaimed);
            }
            Err(err) => return Err(err.into()),
        }

        let claim = attachment_claims::table.find(new_claim.id).first(conn)?;
        Ok(claim)
    })
}

pub fn release(conn: &mut PgConnection, claim_id: Uuid) -> Result<(), FulfillmentError> {
    conn.transaction(|conn| {
        let claim: AttachmentClaim = attachment_claims::table
            .find(claim_id)
            .first(conn)
            .optional()?
            .ok_or(FulfillmentError::NotFound)?;

        release_claim_row(conn, &claim)
    })
}

/// Releases a recipient's claim in a group, if any. Used by the swap opt-in,
/// which frees the physical attachment when delivery goes virtual.
pub fn release_for_recipient(
    conn: &mut PgConnection,
    recipient_email: &str,
    message_group_id: Uuid,
) -> Result<bool, FulfillmentError> {
    let claim: Option<AttachmentClaim> = attachment_claims::table
        .filter(attachment_claims::recipient_email.eq(recipient_email))
        .filter(attachment_claims::message_group_id.eq(message_group_id))
        .first(conn)
        .optional()?;

    match claim {
        Some(claim) => {
            release_claim_row(conn, &claim)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn release_claim_row(
    conn: &mut PgConnection,
    claim: &AttachmentClaim,
) -> Result<(), FulfillmentError> {
    // The filter clamps the counter at capacity: a release only restores a
    // unit that a claim previously took, even if an admin lowered capacity
    // in between.
    diesel::update(
        attachments::table
            .find(claim.attachment_id)
            .filter(attachments::remaining.lt(attachments::capacity)),
    )
    .set((
        attachments::remaining.eq(attachments::remaining + 1),
        attachments::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    diesel::delete(attachment_claims::table.find(claim.id)).execute(conn)?;
    Ok(())
}

pub fn list_attachments(
    conn: &mut PgConnection,
    message_group_id: Uuid,
) -> QueryResult<Vec<Attachment>> {
    attachments::table
        .filter(attachments::message_group_id.eq(message_group_id))
        .order((attachments::created_at.asc(), attachments::id.asc()))
        .load(conn)
}

pub fn list_claims(
    conn: &mut PgConnection,
    message_group_id: Uuid,
) -> QueryResult<Vec<(AttachmentClaim, String)>> {
    attachment_claims::table
        .inner_join(attachments::table)
        .filter(attachment_claims::message_group_id.eq(message_group_id))
        .order(attachment_claims::created_at.asc())
        .select((attachment_claims::all_columns, attachments::name))
        .load(conn)
}

pub fn find_claim(
    conn: &mut PgConnection,
    recipient_email: &str,
    message_group_id: Uuid,
) -> QueryResult<Option<AttachmentClaim>> {
    attachment_claims::table
        .filter(attachment_claims::recipient_email.eq(recipient_email))
        .filter(attachment_claims::message_group_id.eq(message_group_id))
        .first(conn)
        .optional()
}

pub fn add_attachment(
    conn: &mut PgConnection,
    message_group_id: Uuid,
    name: &str,
    capacity: i32,
) -> Result<Attachment, FulfillmentError> {
    let new_attachment = NewAttachment {
        id: Uuid::new_v4(),
        message_group_id,
        name: name.to_string(),
        remaining: capacity,
        capacity,
    };

    diesel::insert_into(attachments::table)
        .values(&new_attachment)
        .execute(conn)?;

    let attachment = attachments::table.find(new_attachment.id).first(conn)?;
    Ok(attachment)
}

/// Deletion is blocked while active claims reference the attachment, so a
/// delete can never leave dangling claims.
pub fn delete_attachment(
    conn: &mut PgConnection,
    attachment_id: Uuid,
) -> Result<(), FulfillmentError> {
    conn.transaction(|conn| {
        let active: i64 = attachment_claims::table
            .filter(attachment_claims::attachment_id.eq(attachment_id))
            .count()
            .get_result(conn)?;

        if active > 0 {
            return Err(FulfillmentError::InvalidTarget(format!(
                "attachment still has {active} active claims"
            )));
        }

        let deleted = diesel::delete(attachments::table.find(attachment_id)).execute(conn)?;
        if deleted == 0 {
            return Err(FulfillmentError::NotFound);
        }
        Ok(())
    })
}

#[derive(Debug, Serialize)]
pub struct InventoryViolation {
    pub attachment_id: Uuid,
    pub name: String,
    pub remaining: i32,
    pub active_claims: i64,
    pub capacity: i32,
}

/// Checks `remaining + active claims == capacity` for every attachment in the
/// group. A violation indicates a bug and is reported, never repaired.
pub fn verify_inventory(
    conn: &mut PgConnection,
    message_group_id: Uuid,
) -> QueryResult<Vec<InventoryViolation>> {
    let all: Vec<Attachment> = attachments::table
        .filter(attachments::message_group_id.eq(message_group_id))
        .load(conn)?;

    let mut violations = Vec::new();
    for attachment in all {
        let active_claims: i64 = attachment_claims::table
            .filter(attachment_claims::attachment_id.eq(attachment.id))
            .count()
            .get_result(conn)?;

        if attachment.remaining as i64 + active_claims != attachment.capacity as i64 {
            violations.push(InventoryViolation {
                attachment_id: attachment.id,
                name: attachment.name,
                remaining: attachment.remaining,
                active_claims,
                capacity: attachment.capacity,
            });
        }
    }
    Ok(violations)
}
