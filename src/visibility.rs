//! Visibility overrides.
//!
//! A group's `hide_cards` flag hides card content from everyone; an override
//! row grants a single recipient visibility anyway. Duplicate override rows
//! are permitted and each independently grants visibility.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::models::{NewVisibilityOverride, VisibilityOverride};
use crate::schema::visibility_overrides;

/// The visibility decision itself, kept pure so every read site agrees.
pub fn is_visible(group_hides_cards: bool, has_override: bool) -> bool {
    !group_hides_cards || has_override
}

pub fn has_override(
    conn: &mut PgConnection,
    recipient_email: &str,
    message_group_id: Uuid,
) -> QueryResult<bool> {
    let count: i64 = visibility_overrides::table
        .filter(visibility_overrides::recipient_email.eq(recipient_email))
        .filter(visibility_overrides::message_group_id.eq(message_group_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn add_override(
    conn: &mut PgConnection,
    recipient_email: &str,
    message_group_id: Uuid,
) -> QueryResult<VisibilityOverride> {
    let new_override = NewVisibilityOverride {
        id: Uuid::new_v4(),
        recipient_email: recipient_email.to_string(),
        message_group_id,
    };

    diesel::insert_into(visibility_overrides::table)
        .values(&new_override)
        .execute(conn)?;

    visibility_overrides::table.find(new_override.id).first(conn)
}

/// Idempotent: removing an override that does not exist is not an error.
pub fn remove_override(conn: &mut PgConnection, override_id: Uuid) -> QueryResult<()> {
    diesel::delete(visibility_overrides::table.find(override_id)).execute(conn)?;
    Ok(())
}

pub fn list_overrides(conn: &mut PgConnection) -> QueryResult<Vec<VisibilityOverride>> {
    visibility_overrides::table
        .order(visibility_overrides::created_at.desc())
        .load(conn)
}
