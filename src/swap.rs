//! Delivery-swap resolution.
//!
//! A recipient may opt to receive a source group's cards virtually in a
//! destination group. Card rows never move; `effective_group` resolves the
//! logical group at read and render time, and every read site goes through
//! it so single-card views and bulk export cannot diverge.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::allocator;
use crate::error::FulfillmentError;
use crate::models::{Card, MessageGroup, NewSwapPreference, SwapPreference};
use crate::schema::{cards, message_groups, swap_preferences};
use crate::settings;

/// Resolves the group a recipient's card logically belongs to. Exactly one
/// hop: destination groups are never re-resolved, so chains and cycles are
/// impossible. When the configured swap source is the `none` sentinel this
/// is the identity function and performs no preference lookup.
pub fn effective_group(
    conn: &mut PgConnection,
    recipient_email: &str,
    original_group: &MessageGroup,
) -> Result<MessageGroup, FulfillmentError> {
    let swap_from = settings::get(conn, settings::SWAP_FROM)?;
    if settings::is_disabled(&swap_from) {
        return Ok(original_group.clone());
    }

    let preference: Option<SwapPreference> = swap_preferences::table
        .filter(swap_preferences::recipient_email.eq(recipient_email))
        .filter(swap_preferences::from_group_id.eq(original_group.id))
        .first(conn)
        .optional()?;

    match preference {
        Some(preference) => {
            let destination = message_groups::table
                .find(preference.to_group_id)
                .first(conn)?;
            Ok(destination)
        }
        None => Ok(original_group.clone()),
    }
}

/// Opts a recipient into virtual delivery for the currently configured swap
/// source group. Any attachment claim held in the source group is released,
/// since there will be no physical card to attach it to.
pub fn create_preference(
    conn: &mut PgConnection,
    recipient_email: &str,
) -> Result<SwapPreference, FulfillmentError> {
    conn.transaction(|conn| {
        let swap_from = settings::get(conn, settings::SWAP_FROM)?;
        let swap_to = settings::get(conn, settings::SWAP_TO)?;
        if settings::is_disabled(&swap_from) || settings::is_disabled(&swap_to) {
            return Err(FulfillmentError::InvalidTarget(
                "swapping is not currently enabled".to_string(),
            ));
        }

        let from_group: MessageGroup = message_groups::table
            .filter(message_groups::slug.eq(&swap_from))
            .first(conn)
            .optional()?
            .ok_or(FulfillmentError::NotFound)?;
        let to_group: MessageGroup = message_groups::table
            .filter(message_groups::slug.eq(&swap_to))
            .first(conn)
            .optional()?
            .ok_or(FulfillmentError::NotFound)?;

        allocator::release_for_recipient(conn, recipient_email, from_group.id)?;

        let new_preference = NewSwapPreference {
            id: Uuid::new_v4(),
            recipient_email: recipient_email.to_string(),
            from_group_id: from_group.id,
            to_group_id: to_group.id,
        };

        // Re-opting-in is a no-op that keeps the existing preference row.
        diesel::insert_into(swap_preferences::table)
            .values(&new_preference)
            .on_conflict((
                swap_preferences::recipient_email,
                swap_preferences::from_group_id,
            ))
            .do_nothing()
            .execute(conn)?;

        let preference = swap_preferences::table
            .filter(swap_preferences::recipient_email.eq(recipient_email))
            .filter(swap_preferences::from_group_id.eq(from_group.id))
            .first(conn)?;
        Ok(preference)
    })
}

/// Deleting a preference only affects future resolution; cards already
/// rendered or exported under the destination group are untouched.
pub fn delete_preference(
    conn: &mut PgConnection,
    preference_id: Uuid,
) -> Result<SwapPreference, FulfillmentError> {
    let preference: SwapPreference = swap_preferences::table
        .find(preference_id)
        .first(conn)
        .optional()?
        .ok_or(FulfillmentError::NotFound)?;

    diesel::delete(swap_preferences::table.find(preference_id)).execute(conn)?;
    Ok(preference)
}

pub fn list_preferences(conn: &mut PgConnection) -> QueryResult<Vec<SwapPreference>> {
    swap_preferences::table
        .order(swap_preferences::created_at.asc())
        .load(conn)
}

pub fn find_preference(
    conn: &mut PgConnection,
    preference_id: Uuid,
) -> QueryResult<Option<SwapPreference>> {
    swap_preferences::table
        .find(preference_id)
        .first(conn)
        .optional()
}

pub fn find_preference_for(
    conn: &mut PgConnection,
    recipient_email: &str,
    from_group_id: Uuid,
) -> QueryResult<Option<SwapPreference>> {
    swap_preferences::table
        .filter(swap_preferences::recipient_email.eq(recipient_email))
        .filter(swap_preferences::from_group_id.eq(from_group_id))
        .first(conn)
        .optional()
}

/// Enumerates the cards that logically belong to `group` after swap
/// resolution: rows stored in the group whose recipients have not swapped
/// away, plus rows stored in other groups that resolve here.
pub fn effective_member_cards(
    conn: &mut PgConnection,
    group: &MessageGroup,
) -> Result<Vec<Card>, FulfillmentError> {
    let mut members: Vec<Card> = cards::table
        .filter(cards::message_group_id.eq(group.id))
        .load(conn)?;

    let swap_from = settings::get(conn, settings::SWAP_FROM)?;
    if settings::is_disabled(&swap_from) {
        return Ok(members);
    }

    let swapped_out: Vec<String> = swap_preferences::table
        .filter(swap_preferences::from_group_id.eq(group.id))
        .select(swap_preferences::recipient_email)
        .load(conn)?;
    if !swapped_out.is_empty() {
        members.retain(|card| !swapped_out.contains(&card.recipient_email));
    }

    let inbound: Vec<SwapPreference> = swap_preferences::table
        .filter(swap_preferences::to_group_id.eq(group.id))
        .load(conn)?;
    for preference in inbound {
        let mut swapped_in: Vec<Card> = cards::table
            .filter(cards::message_group_id.eq(preference.from_group_id))
            .filter(cards::recipient_email.eq(&preference.recipient_email))
            .load(conn)?;
        members.append(&mut swapped_in);
    }

    Ok(members)
}
