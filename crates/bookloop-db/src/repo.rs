//! Repository contracts per entity. The core only talks to these traits,
//! so the backing store can change without touching exchange or chat logic.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bookloop_types::models::{Book, BookStatus, Conversation, Exchange, ExchangeStatus, Message, User};

use crate::models::{NewUser, UserCredentials};

pub trait UserRepo: Send + Sync {
    /// Returns false when the email is already registered.
    fn insert_user(&self, user: &NewUser<'_>) -> Result<bool>;

    fn user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    fn credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>>;

    fn list_users(&self) -> Result<Vec<User>>;

    /// Updates the present fields. Returns `None` for an unknown user.
    fn update_profile(&self, id: Uuid, name: Option<&str>, bio: Option<&str>) -> Result<Option<User>>;

    /// Adds or removes `book_id` from the favorites and returns the new set.
    fn toggle_favorite(&self, user_id: Uuid, book_id: Uuid) -> Result<Vec<Uuid>>;
}

pub trait BookRepo: Send + Sync {
    fn insert_book(&self, book: &Book) -> Result<()>;

    fn book_by_id(&self, id: Uuid) -> Result<Option<Book>>;

    /// Newest listings first.
    fn list_books(&self) -> Result<Vec<Book>>;

    fn books_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Book>>;

    /// Overwrites every editable column. Returns false for an unknown book.
    fn update_book(&self, book: &Book) -> Result<bool>;

    fn delete_book(&self, id: Uuid) -> Result<bool>;

    fn set_book_status(&self, id: Uuid, status: BookStatus) -> Result<bool>;
}

pub trait ExchangeRepo: Send + Sync {
    fn insert_exchange(&self, exchange: &Exchange) -> Result<()>;

    /// Inserts the exchange and finds or inserts its conversation in one
    /// transaction. Returns the conversation that owns the candidate's key.
    fn insert_exchange_with_conversation(&self, exchange: &Exchange, candidate: &Conversation) -> Result<Conversation>;

    fn exchange_by_id(&self, id: Uuid) -> Result<Option<Exchange>>;

    /// Exchanges where the user is requester or owner, in insertion order.
    fn exchanges_for(&self, user_id: Uuid) -> Result<Vec<Exchange>>;

    /// True if any exchange for `book_id` connects `a` and `b`, whatever its status.
    fn exchange_links(&self, a: Uuid, b: Uuid, book_id: Uuid) -> Result<bool>;

    /// Compare-and-set out of `requested`. Returns `None` when the exchange
    /// is unknown or was already decided.
    fn transition_exchange(&self, id: Uuid, to: ExchangeStatus, at: DateTime<Utc>) -> Result<Option<Exchange>>;
}

pub trait ConversationRepo: Send + Sync {
    /// Inserts `candidate` unless a conversation with the same participants and
    /// book exists, and returns whichever record now owns that key.
    fn find_or_insert_conversation(&self, candidate: &Conversation) -> Result<Conversation>;

    fn conversation_by_id(&self, id: Uuid) -> Result<Option<Conversation>>;

    fn conversations_for(&self, user_id: Uuid) -> Result<Vec<Conversation>>;

    fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()>;
}

pub trait MessageRepo: Send + Sync {
    /// Appends the message, bumps `last_message_at` and increments the unread
    /// counter of each recipient, atomically.
    fn append_message(&self, message: &Message, recipients: &[Uuid]) -> Result<()>;

    /// Oldest first; insertion order breaks timestamp ties.
    fn messages_for(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>>;
}

/// Everything the core needs from persistence.
pub trait Store: UserRepo + BookRepo + ExchangeRepo + ConversationRepo + MessageRepo {}

impl<T> Store for T where T: UserRepo + BookRepo + ExchangeRepo + ConversationRepo + MessageRepo {}
