use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::schema::settings;

/// Sentinel value meaning a setting is disabled.
pub const NONE_SENTINEL: &str = "none";

/// Group currently accepting new cards. `none` while the form is closed.
pub const FORM_GROUP: &str = "form_group";
/// Group whose attachments recipients may currently claim.
pub const ATTACHMENT_GROUP: &str = "attachment_group";
/// Source group for delivery swaps. `none` disables swap resolution entirely.
pub const SWAP_FROM: &str = "swap_from";
/// Destination group for delivery swaps.
pub const SWAP_TO: &str = "swap_to";

pub const KNOWN_KEYS: &[&str] = &[FORM_GROUP, ATTACHMENT_GROUP, SWAP_FROM, SWAP_TO];

pub fn get(conn: &mut PgConnection, key: &str) -> QueryResult<String> {
    let value: Option<String> = settings::table
        .find(key)
        .select(settings::value)
        .first(conn)
        .optional()?;
    Ok(value.unwrap_or_else(|| NONE_SENTINEL.to_string()))
}

pub fn set(conn: &mut PgConnection, key: &str, value: &str) -> QueryResult<()> {
    diesel::insert_into(settings::table)
        .values((
            settings::key.eq(key),
            settings::value.eq(value),
            settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .on_conflict(settings::key)
        .do_update()
        .set((
            settings::value.eq(value),
            settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn all(conn: &mut PgConnection) -> QueryResult<Vec<(String, String)>> {
    let mut entries: Vec<(String, String)> = settings::table
        .select((settings::key, settings::value))
        .load(conn)?;
    for key in KNOWN_KEYS {
        if !entries.iter().any(|(k, _)| k == key) {
            entries.push((key.to_string(), NONE_SENTINEL.to_string()));
        }
    }
    entries.sort();
    Ok(entries)
}

pub fn is_disabled(value: &str) -> bool {
    value == NONE_SENTINEL || value.is_empty()
}
