//! Database row types. These map directly to SQLite rows and stay distinct
//! from the bookloop-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use bookloop_types::models::{Book, Exchange, Message, User};

/// Timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`) so that
/// lexicographic order in SQL matches chronological order.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

pub fn decode_uuid(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

fn decode_optional_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub bio: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self, favorites: Vec<Uuid>) -> Result<User> {
        Ok(User {
            id: decode_uuid(&self.id)?,
            name: self.name,
            email: self.email,
            bio: self.bio,
            favorites,
            created_at: decode_ts(&self.created_at)?,
        })
    }
}

/// Fields needed to create an account. The password is already hashed.
pub struct NewUser<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash, for login only.
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

pub struct BookRow {
    pub id: String,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub condition: String,
    pub location: String,
    pub image_url: String,
    pub owner_id: String,
    pub status: String,
    pub created_at: String,
}

impl TryFrom<BookRow> for Book {
    type Error = anyhow::Error;

    fn try_from(row: BookRow) -> Result<Self> {
        Ok(Book {
            id: decode_uuid(&row.id)?,
            title: row.title,
            author: row.author,
            genre: row.genre,
            condition: row.condition,
            location: row.location,
            image_url: row.image_url,
            owner_id: decode_uuid(&row.owner_id)?,
            status: row.status.parse()?,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

pub struct ExchangeRow {
    pub id: String,
    pub book_id: String,
    pub requester_id: String,
    pub owner_id: String,
    pub message: String,
    pub status: String,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub declined_at: Option<String>,
}

impl TryFrom<ExchangeRow> for Exchange {
    type Error = anyhow::Error;

    fn try_from(row: ExchangeRow) -> Result<Self> {
        Ok(Exchange {
            id: decode_uuid(&row.id)?,
            book_id: decode_uuid(&row.book_id)?,
            requester_id: decode_uuid(&row.requester_id)?,
            owner_id: decode_uuid(&row.owner_id)?,
            message: row.message,
            status: row.status.parse()?,
            created_at: decode_ts(&row.created_at)?,
            accepted_at: decode_optional_ts(row.accepted_at)?,
            declined_at: decode_optional_ts(row.declined_at)?,
        })
    }
}

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub book_id: String,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

pub struct UnreadRow {
    pub user_id: String,
    pub count: u32,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: decode_uuid(&row.id)?,
            conversation_id: decode_uuid(&row.conversation_id)?,
            sender_id: decode_uuid(&row.sender_id)?,
            sender_name: row.sender_name,
            text: row.text,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}
