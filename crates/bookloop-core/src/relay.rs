use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use bookloop_db::Store;
use bookloop_types::events::GatewayEvent;
use bookloop_types::models::{ANONYMOUS_NAME, ANONYMOUS_SENDER, Message};

use crate::conversations::Conversations;
use crate::error::{CoreError, CoreResult};
use crate::fanout::Fanout;

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Who is posting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User(Uuid),
    /// Guest on the realtime path. Only reachable when the gateway is
    /// configured to tolerate unauthenticated senders.
    Anonymous,
}

/// The single write path for conversation messages, shared by the HTTP
/// handlers and the realtime gateway.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn Store>,
    conversations: Conversations,
    fanout: Arc<dyn Fanout>,
    /// conversation_id -> ordering lock held across persist + publish
    order_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn Store>, conversations: Conversations, fanout: Arc<dyn Fanout>) -> Self {
        Self {
            store,
            conversations,
            fanout,
            order_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a message, bump unread counters for everyone but the sender and
    /// publish it to the conversation room.
    pub fn send(&self, conversation_id: Uuid, sender: Sender, text: &str) -> CoreResult<Message> {
        if text.trim().is_empty() {
            return Err(CoreError::invalid_input("Empty message"));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(CoreError::invalid_input(format!(
                "Message longer than {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let (conversation, sender_id, sender_name) = match sender {
            Sender::User(user_id) => {
                let conversation = self.conversations.for_participant(conversation_id, user_id)?;
                let name = self
                    .store
                    .user_by_id(user_id)?
                    .map(|u| u.name)
                    .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
                (conversation, user_id, name)
            }
            Sender::Anonymous => {
                let conversation = self
                    .store
                    .conversation_by_id(conversation_id)?
                    .ok_or_else(|| CoreError::not_found("Conversation not found"))?;
                warn!("Anonymous message accepted into conversation {}", conversation_id);
                (conversation, ANONYMOUS_SENDER, ANONYMOUS_NAME.to_string())
            }
        };

        let recipients = conversation.recipients_of(sender_id);

        let lock = self.order_lock(conversation_id)?;
        let sent = self.persist_and_publish(&lock, conversation_id, sender_id, sender_name, &recipients, text);
        self.release_order_lock(conversation_id, lock);
        let message = sent?;

        debug!(
            "Message {} in conversation {} from {}",
            message.id, conversation_id, message.sender_id
        );
        Ok(message)
    }

    fn persist_and_publish(
        &self,
        lock: &Mutex<()>,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        recipients: &[Uuid],
        text: &str,
    ) -> CoreResult<Message> {
        let _ordered = lock
            .lock()
            .map_err(|e| anyhow::anyhow!("conversation lock poisoned: {}", e))?;

        // Timestamp taken under the lock so created_at never goes backwards
        // within a conversation.
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sender_name,
            text: text.to_string(),
            created_at: crate::timestamp(),
        };

        self.store.append_message(&message, recipients)?;
        self.fanout
            .publish_to_conversation(conversation_id, GatewayEvent::ConversationMessage(message.clone()));
        Ok(message)
    }

    /// Every message of the conversation, oldest first.
    pub fn history(&self, conversation_id: Uuid, requester: Uuid) -> CoreResult<Vec<Message>> {
        self.conversations.for_participant(conversation_id, requester)?;
        Ok(self.store.messages_for(conversation_id)?)
    }

    fn order_lock(&self, conversation_id: Uuid) -> CoreResult<Arc<Mutex<()>>> {
        let mut locks = self
            .order_locks
            .lock()
            .map_err(|e| anyhow::anyhow!("lock table poisoned: {}", e))?;
        Ok(locks.entry(conversation_id).or_default().clone())
    }

    /// Drops the table entry once no other sender holds it. Clones only happen
    /// under the table lock, so the count cannot rise while it is checked.
    fn release_order_lock(&self, conversation_id: Uuid, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.order_locks.lock() else {
            return;
        };
        // One reference in the table plus ours.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&conversation_id);
        }
    }
}
