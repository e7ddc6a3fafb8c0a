use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use bookloop_types::models::{Book, BookStatus, Conversation, Exchange, ExchangeStatus, Message, User};

use crate::Database;
use crate::models::{
    BookRow, ConversationRow, ExchangeRow, MessageRow, NewUser, UnreadRow, UserCredentials, UserRow,
    decode_ts, decode_uuid, encode_ts,
};
use crate::repo::{BookRepo, ConversationRepo, ExchangeRepo, MessageRepo, UserRepo};

const USER_COLUMNS: &str = "id, name, email, password, bio, created_at";
const BOOK_COLUMNS: &str =
    "id, title, author, genre, condition, location, image_url, owner_id, status, created_at";
const EXCHANGE_COLUMNS: &str =
    "id, book_id, requester_id, owner_id, message, status, created_at, accepted_at, declined_at";
const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, book_id, created_at, last_message_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sender_name, text, created_at";

// -- Users --

impl UserRepo for Database {
    fn insert_user(&self, user: &NewUser<'_>) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, name, email, password, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, '', ?5)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.password_hash,
                    encode_ts(&user.created_at)
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    fn credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    [email],
                    map_user_row,
                )
                .optional()?;

            let Some(row) = row else { return Ok(None) };
            let favorites = query_favorites(conn, &row.id)?;
            let password_hash = row.password.clone();
            Ok(Some(UserCredentials {
                user: row.into_user(favorites)?,
                password_hash,
            }))
        })
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let favorites = query_favorites(conn, &row.id)?;
                    row.into_user(favorites)
                })
                .collect()
        })
    }

    fn update_profile(&self, id: Uuid, name: Option<&str>, bio: Option<&str>) -> Result<Option<User>> {
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE users SET name = COALESCE(?2, name), bio = COALESCE(?3, bio) WHERE id = ?1",
                params![id.to_string(), name, bio],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(tx, id)
        })
    }

    fn toggle_favorite(&self, user_id: Uuid, book_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_tx(|tx| {
            let uid = user_id.to_string();
            let bid = book_id.to_string();
            let removed = tx.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND book_id = ?2",
                params![uid, bid],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO favorites (user_id, book_id) VALUES (?1, ?2)",
                    params![uid, bid],
                )?;
            }
            query_favorites(tx, &uid)
        })
    }
}

// -- Books --

impl BookRepo for Database {
    fn insert_book(&self, book: &Book) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO books (id, title, author, genre, condition, location, image_url, owner_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    book.id.to_string(),
                    book.title,
                    book.author,
                    book.genre,
                    book.condition,
                    book.location,
                    book.image_url,
                    book.owner_id.to_string(),
                    book.status.as_str(),
                    encode_ts(&book.created_at)
                ],
            )?;
            Ok(())
        })
    }

    fn book_by_id(&self, id: Uuid) -> Result<Option<Book>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
                [id.to_string()],
                map_book_row,
            )
            .optional()?
            .map(Book::try_from)
            .transpose()
        })
    }

    fn list_books(&self) -> Result<Vec<Book>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOK_COLUMNS} FROM books ORDER BY created_at DESC, seq DESC"
            ))?;
            let rows = stmt
                .query_map([], map_book_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Book::try_from).collect()
        })
    }

    fn books_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Book>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE id IN ({}) ORDER BY seq",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = id_strings
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), map_book_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Book::try_from).collect()
        })
    }

    fn update_book(&self, book: &Book) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE books SET title = ?2, author = ?3, genre = ?4, condition = ?5,
                     location = ?6, image_url = ?7, status = ?8
                 WHERE id = ?1",
                params![
                    book.id.to_string(),
                    book.title,
                    book.author,
                    book.genre,
                    book.condition,
                    book.location,
                    book.image_url,
                    book.status.as_str()
                ],
            )?;
            Ok(updated == 1)
        })
    }

    fn delete_book(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM books WHERE id = ?1", [id.to_string()])?;
            Ok(deleted == 1)
        })
    }

    fn set_book_status(&self, id: Uuid, status: BookStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE books SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )?;
            Ok(updated == 1)
        })
    }
}

// -- Exchanges --

impl ExchangeRepo for Database {
    fn insert_exchange(&self, exchange: &Exchange) -> Result<()> {
        self.with_conn(|conn| insert_exchange_row(conn, exchange))
    }

    fn insert_exchange_with_conversation(&self, exchange: &Exchange, candidate: &Conversation) -> Result<Conversation> {
        self.with_tx(|tx| {
            insert_exchange_row(tx, exchange)?;
            find_or_insert_conversation_row(tx, candidate)
        })
    }

    fn exchange_by_id(&self, id: Uuid) -> Result<Option<Exchange>> {
        self.with_conn(|conn| query_exchange(conn, id))
    }

    fn exchanges_for(&self, user_id: Uuid) -> Result<Vec<Exchange>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXCHANGE_COLUMNS} FROM exchanges
                 WHERE requester_id = ?1 OR owner_id = ?1
                 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], map_exchange_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Exchange::try_from).collect()
        })
    }

    fn exchange_links(&self, a: Uuid, b: Uuid, book_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM exchanges
                     WHERE book_id = ?1
                       AND ((requester_id = ?2 AND owner_id = ?3)
                         OR (requester_id = ?3 AND owner_id = ?2))
                 )",
                params![book_id.to_string(), a.to_string(), b.to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    fn transition_exchange(&self, id: Uuid, to: ExchangeStatus, at: DateTime<Utc>) -> Result<Option<Exchange>> {
        let sql = match to {
            ExchangeStatus::Accepted => {
                "UPDATE exchanges SET status = 'accepted', accepted_at = ?2
                 WHERE id = ?1 AND status = 'requested'"
            }
            ExchangeStatus::Declined => {
                "UPDATE exchanges SET status = 'declined', declined_at = ?2
                 WHERE id = ?1 AND status = 'requested'"
            }
            ExchangeStatus::Requested => return Err(anyhow!("cannot transition back to requested")),
        };

        self.with_tx(|tx| {
            let updated = tx.execute(sql, params![id.to_string(), encode_ts(&at)])?;
            if updated == 0 {
                return Ok(None);
            }
            query_exchange(tx, id)
        })
    }
}

// -- Conversations --

impl ConversationRepo for Database {
    fn find_or_insert_conversation(&self, candidate: &Conversation) -> Result<Conversation> {
        self.with_tx(|tx| find_or_insert_conversation_row(tx, candidate))
    }

    fn conversation_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    [id.to_string()],
                    map_conversation_row,
                )
                .optional()?;
            row.map(|row| load_conversation(conn, row)).transpose()
        })
    }

    fn conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(|row| load_conversation(conn, row)).collect()
        })
    }

    fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_unread (conversation_id, user_id, count) VALUES (?1, ?2, 0)
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET count = 0",
                params![conversation_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }
}

// -- Messages --

impl MessageRepo for Database {
    fn append_message(&self, message: &Message, recipients: &[Uuid]) -> Result<()> {
        self.with_tx(|tx| {
            let cid = message.conversation_id.to_string();
            let created_at = encode_ts(&message.created_at);

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_name, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    cid,
                    message.sender_id.to_string(),
                    message.sender_name,
                    message.text,
                    created_at
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                params![cid, created_at],
            )?;

            for recipient in recipients {
                tx.execute(
                    "INSERT INTO conversation_unread (conversation_id, user_id, count) VALUES (?1, ?2, 1)
                     ON CONFLICT (conversation_id, user_id) DO UPDATE SET count = count + 1",
                    params![cid, recipient.to_string()],
                )?;
            }

            Ok(())
        })
    }

    fn messages_for(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, seq ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Message::try_from).collect()
        })
    }

    fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, seq DESC
                     LIMIT 1"
                ),
                [conversation_id.to_string()],
                map_message_row,
            )
            .optional()?
            .map(Message::try_from)
            .transpose()
        })
    }
}

// -- Row helpers --

fn query_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id.to_string()],
            map_user_row,
        )
        .optional()?;

    let Some(row) = row else { return Ok(None) };
    let favorites = query_favorites(conn, &row.id)?;
    Ok(Some(row.into_user(favorites)?))
}

fn query_favorites(conn: &Connection, user_id: &str) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT book_id FROM favorites WHERE user_id = ?1 ORDER BY rowid")?;
    let ids = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    ids.iter().map(|id| decode_uuid(id)).collect()
}

fn query_exchange(conn: &Connection, id: Uuid) -> Result<Option<Exchange>> {
    conn.query_row(
        &format!("SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = ?1"),
        [id.to_string()],
        map_exchange_row,
    )
    .optional()?
    .map(Exchange::try_from)
    .transpose()
}

fn insert_exchange_row(conn: &Connection, exchange: &Exchange) -> Result<()> {
    conn.execute(
        "INSERT INTO exchanges (id, book_id, requester_id, owner_id, message, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            exchange.id.to_string(),
            exchange.book_id.to_string(),
            exchange.requester_id.to_string(),
            exchange.owner_id.to_string(),
            exchange.message,
            exchange.status.as_str(),
            encode_ts(&exchange.created_at)
        ],
    )?;
    Ok(())
}

fn find_or_insert_conversation_row(conn: &Connection, candidate: &Conversation) -> Result<Conversation> {
    let [a, b] = candidate.participants;
    let book_key = encode_book_key(candidate.book_id);

    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, participant_a, participant_b, book_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            candidate.id.to_string(),
            a.to_string(),
            b.to_string(),
            book_key,
            encode_ts(&candidate.created_at)
        ],
    )?;

    let row = conn.query_row(
        &format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_a = ?1 AND participant_b = ?2 AND book_id = ?3"
        ),
        params![a.to_string(), b.to_string(), book_key],
        map_conversation_row,
    )?;
    load_conversation(conn, row)
}

fn load_conversation(conn: &Connection, row: ConversationRow) -> Result<Conversation> {
    let mut stmt =
        conn.prepare("SELECT user_id, count FROM conversation_unread WHERE conversation_id = ?1")?;
    let unread_rows = stmt
        .query_map([&row.id], |r| {
            Ok(UnreadRow {
                user_id: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut unread = HashMap::with_capacity(unread_rows.len());
    for r in unread_rows {
        unread.insert(decode_uuid(&r.user_id)?, r.count);
    }

    Ok(Conversation {
        id: decode_uuid(&row.id)?,
        participants: [decode_uuid(&row.participant_a)?, decode_uuid(&row.participant_b)?],
        book_id: decode_book_key(&row.book_id)?,
        created_at: decode_ts(&row.created_at)?,
        last_message_at: row.last_message_at.as_deref().map(decode_ts).transpose()?,
        unread,
    })
}

/// Unscoped conversations store an empty book key so the unique index still
/// applies (SQLite treats NULLs as distinct).
fn encode_book_key(book_id: Option<Uuid>) -> String {
    book_id.map(|id| id.to_string()).unwrap_or_default()
}

fn decode_book_key(raw: &str) -> Result<Option<Uuid>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        decode_uuid(raw).map(Some)
    }
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        bio: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_book_row(row: &Row<'_>) -> rusqlite::Result<BookRow> {
    Ok(BookRow {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        genre: row.get(3)?,
        condition: row.get(4)?,
        location: row.get(5)?,
        image_url: row.get(6)?,
        owner_id: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn map_exchange_row(row: &Row<'_>) -> rusqlite::Result<ExchangeRow> {
    Ok(ExchangeRow {
        id: row.get(0)?,
        book_id: row.get(1)?,
        requester_id: row.get(2)?,
        owner_id: row.get(3)?,
        message: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        accepted_at: row.get(7)?,
        declined_at: row.get(8)?,
    })
}

fn map_conversation_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        book_id: row.get(3)?,
        created_at: row.get(4)?,
        last_message_at: row.get(5)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
