use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use bookloop_db::Store;
use bookloop_types::api::{ConversationSummary, ParticipantInfo};
use bookloop_types::models::{Conversation, sorted_pair};

use crate::error::{CoreError, CoreResult};
use crate::gate::may_converse;

/// Owns conversation records: gated creation, dedup, listing and read state.
#[derive(Clone)]
pub struct Conversations {
    store: Arc<dyn Store>,
}

impl Conversations {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the conversation between `a` and `b` about `book_id`, creating
    /// it on first use. Fails with `Forbidden` unless an exchange links them.
    pub fn get_or_create(&self, a: Uuid, b: Uuid, book_id: Uuid) -> CoreResult<Conversation> {
        if !may_converse(&*self.store, a, b, book_id)? {
            return Err(CoreError::forbidden(
                "Start an exchange for this book to open a private chat.",
            ));
        }

        let candidate = candidate(a, b, book_id);
        let conversation = self.store.find_or_insert_conversation(&candidate)?;
        log_opened(&candidate, &conversation, book_id);
        Ok(conversation)
    }

    /// Request-path variant of `get_or_create`: the counterpart and the book
    /// must exist before the gate is consulted.
    pub fn open(&self, caller: Uuid, other_user_id: Uuid, book_id: Uuid) -> CoreResult<Conversation> {
        if self.store.user_by_id(other_user_id)?.is_none() {
            return Err(CoreError::not_found("User not found"));
        }
        if self.store.book_by_id(book_id)?.is_none() {
            return Err(CoreError::not_found("Book not found"));
        }
        self.get_or_create(caller, other_user_id, book_id)
    }

    /// Conversations the user takes part in, most recently active first.
    pub fn list_for(&self, user_id: Uuid) -> CoreResult<Vec<ConversationSummary>> {
        let conversations = self.store.conversations_for(user_id)?;

        let mut people: HashMap<Uuid, ParticipantInfo> = HashMap::new();
        let mut summaries = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let last_message = self.store.last_message(conversation.id)?;

            let mut participants_info = Vec::with_capacity(2);
            for pid in conversation.participants {
                if let Some(info) = people.get(&pid) {
                    participants_info.push(info.clone());
                    continue;
                }
                let info = match self.store.user_by_id(pid)? {
                    Some(user) => ParticipantInfo {
                        id: user.id,
                        name: Some(user.name),
                        email: Some(user.email),
                    },
                    None => ParticipantInfo { id: pid, name: None, email: None },
                };
                people.insert(pid, info.clone());
                participants_info.push(info);
            }

            summaries.push(ConversationSummary {
                unread_count: conversation.unread_for(user_id),
                conversation,
                last_message,
                participants_info,
            });
        }

        summaries.sort_by(|a, b| {
            let at = |s: &ConversationSummary| {
                s.conversation.last_message_at.unwrap_or(s.conversation.created_at)
            };
            at(b).cmp(&at(a))
        });

        Ok(summaries)
    }

    /// Loads a conversation on behalf of `user_id`, who must take part in it.
    pub fn for_participant(&self, conversation_id: Uuid, user_id: Uuid) -> CoreResult<Conversation> {
        let conversation = self
            .store
            .conversation_by_id(conversation_id)?
            .ok_or_else(|| CoreError::not_found("Conversation not found"))?;

        if !conversation.is_participant(user_id) {
            return Err(CoreError::forbidden("Not a participant of this conversation"));
        }
        Ok(conversation)
    }

    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        self.for_participant(conversation_id, user_id)?;
        self.store.reset_unread(conversation_id, user_id)?;
        Ok(())
    }
}

/// Fresh record for the `(a, b, book_id)` key; the store keeps whichever
/// record claimed the key first.
pub(crate) fn candidate(a: Uuid, b: Uuid, book_id: Uuid) -> Conversation {
    Conversation {
        id: Uuid::new_v4(),
        participants: sorted_pair(a, b),
        book_id: Some(book_id),
        created_at: crate::timestamp(),
        last_message_at: None,
        unread: HashMap::new(),
    }
}

pub(crate) fn log_opened(candidate: &Conversation, stored: &Conversation, book_id: Uuid) {
    if stored.id == candidate.id {
        info!("Opened conversation {} about book {}", stored.id, book_id);
    } else {
        debug!("Reusing conversation {}", stored.id);
    }
}
