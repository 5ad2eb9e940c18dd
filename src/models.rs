use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = message_groups)]
pub struct MessageGroup {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub hide_cards: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_groups)]
pub struct NewMessageGroup {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub hide_cards: bool,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = settings)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = cards)]
#[diesel(belongs_to(MessageGroup, foreign_key = message_group_id))]
pub struct Card {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub sender_email: String,
    pub sender_name: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cards)]
pub struct NewCard {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub sender_email: String,
    pub sender_name: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub body: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = attachments)]
#[diesel(belongs_to(MessageGroup, foreign_key = message_group_id))]
pub struct Attachment {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub name: String,
    pub remaining: i32,
    pub capacity: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub name: String,
    pub remaining: i32,
    pub capacity: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = attachment_claims)]
#[diesel(belongs_to(Attachment))]
pub struct AttachmentClaim {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
    pub attachment_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachment_claims)]
pub struct NewAttachmentClaim {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
    pub attachment_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = swap_preferences)]
pub struct SwapPreference {
    pub id: Uuid,
    pub recipient_email: String,
    pub from_group_id: Uuid,
    pub to_group_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = swap_preferences)]
pub struct NewSwapPreference {
    pub id: Uuid,
    pub recipient_email: String,
    pub from_group_id: Uuid,
    pub to_group_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = visibility_overrides)]
pub struct VisibilityOverride {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = visibility_overrides)]
pub struct NewVisibilityOverride {
    pub id: Uuid,
    pub recipient_email: String,
    pub message_group_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = fulfillment_jobs)]
#[diesel(belongs_to(MessageGroup, foreign_key = message_group_id))]
pub struct FulfillmentJob {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub ordering: String,
    pub include_deck: bool,
    pub status: String,
    pub csv_status: String,
    pub deck_status: String,
    pub doc_status: String,
    pub deck_progress: i32,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = fulfillment_jobs)]
pub struct NewFulfillmentJob {
    pub id: Uuid,
    pub message_group_id: Uuid,
    pub ordering: String,
    pub include_deck: bool,
    pub status: String,
    pub csv_status: String,
    pub deck_status: String,
    pub doc_status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = artifacts)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: String,
    pub message_group_id: Uuid,
    pub card_id: Option<Uuid>,
    pub template_variant: Option<i32>,
    pub job_id: Option<Uuid>,
    pub format: Option<String>,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = artifacts)]
pub struct NewArtifact {
    pub id: Uuid,
    pub kind: String,
    pub message_group_id: Uuid,
    pub card_id: Option<Uuid>,
    pub template_variant: Option<i32>,
    pub job_id: Option<Uuid>,
    pub format: Option<String>,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: String,
}
