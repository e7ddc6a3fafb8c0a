use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use bookloop_db::Store;
use bookloop_types::events::GatewayEvent;
use bookloop_types::models::{BookStatus, Conversation, Exchange, ExchangeStatus};

use crate::conversations;
use crate::error::{CoreError, CoreResult};
use crate::fanout::Fanout;

/// Exchange requests and their requested → accepted/declined lifecycle.
#[derive(Clone)]
pub struct ExchangeLedger {
    store: Arc<dyn Store>,
    fanout: Arc<dyn Fanout>,
}

impl ExchangeLedger {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<dyn Fanout>) -> Self {
        Self { store, fanout }
    }

    /// Ask the owner of `book_id` for it. Also opens the private conversation
    /// between requester and owner and pings the owner's identity room.
    pub fn create_exchange(
        &self,
        book_id: Uuid,
        requester_id: Uuid,
        message: &str,
    ) -> CoreResult<(Exchange, Conversation)> {
        let book = self
            .store
            .book_by_id(book_id)?
            .ok_or_else(|| CoreError::not_found("Book not found"))?;

        if book.owner_id == requester_id {
            return Err(CoreError::InvalidOperation("Cannot request your own book".into()));
        }

        let exchange = Exchange {
            id: Uuid::new_v4(),
            book_id,
            requester_id,
            owner_id: book.owner_id,
            message: message.to_string(),
            status: ExchangeStatus::Requested,
            created_at: crate::timestamp(),
            accepted_at: None,
            declined_at: None,
        };
        // The exchange itself opens the gate; both rows commit together.
        let candidate = conversations::candidate(requester_id, exchange.owner_id, book_id);
        let conversation = self.store.insert_exchange_with_conversation(&exchange, &candidate)?;
        info!(
            "Exchange {} requested: book {} by {} from {}",
            exchange.id, book_id, requester_id, exchange.owner_id
        );
        conversations::log_opened(&candidate, &conversation, book_id);

        self.fanout
            .notify_user(exchange.owner_id, GatewayEvent::ExchangeRequest(exchange.clone()));

        Ok((exchange, conversation))
    }

    pub fn list_for(&self, user_id: Uuid) -> CoreResult<Vec<Exchange>> {
        Ok(self.store.exchanges_for(user_id)?)
    }

    /// Owner accepts; the book becomes reserved.
    pub fn accept(&self, exchange_id: Uuid, acting_user: Uuid) -> CoreResult<Exchange> {
        let exchange = self.decide(exchange_id, acting_user, ExchangeStatus::Accepted)?;

        match self.store.set_book_status(exchange.book_id, BookStatus::Reserved) {
            Ok(true) => {}
            Ok(false) => warn!(
                "Exchange {} accepted but book {} no longer exists",
                exchange.id, exchange.book_id
            ),
            Err(e) => {
                error!(
                    "Exchange {} accepted but reserving book {} failed: {:#}",
                    exchange.id, exchange.book_id, e
                );
                return Err(CoreError::Store(e.context("failed to reserve book after acceptance")));
            }
        }

        self.fanout
            .notify_user(exchange.requester_id, GatewayEvent::ExchangeAccepted(exchange.clone()));
        Ok(exchange)
    }

    /// Owner declines; the book is left as is.
    pub fn decline(&self, exchange_id: Uuid, acting_user: Uuid) -> CoreResult<Exchange> {
        let exchange = self.decide(exchange_id, acting_user, ExchangeStatus::Declined)?;
        self.fanout
            .notify_user(exchange.requester_id, GatewayEvent::ExchangeDeclined(exchange.clone()));
        Ok(exchange)
    }

    fn decide(&self, exchange_id: Uuid, acting_user: Uuid, to: ExchangeStatus) -> CoreResult<Exchange> {
        let current = self
            .store
            .exchange_by_id(exchange_id)?
            .ok_or_else(|| CoreError::not_found("Exchange not found"))?;

        if current.owner_id != acting_user {
            return Err(CoreError::forbidden(format!("Only the owner can mark an exchange {}", to)));
        }
        if current.status.is_terminal() {
            return Err(CoreError::InvalidState(format!("Exchange already {}", current.status)));
        }

        // The store only flips rows still in `requested`; losing a race lands here.
        let updated = self
            .store
            .transition_exchange(exchange_id, to, crate::timestamp())?
            .ok_or_else(|| CoreError::InvalidState("Exchange already decided".into()))?;

        info!("Exchange {} {}", updated.id, updated.status);
        Ok(updated)
    }
}
