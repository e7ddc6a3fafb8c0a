use std::sync::{Arc, Mutex};

use uuid::Uuid;

use bookloop_db::models::NewUser;
use bookloop_db::{BookRepo, Database, ExchangeRepo, Store, UserRepo};
use bookloop_types::events::GatewayEvent;
use bookloop_types::models::{Book, BookStatus, Exchange, ExchangeStatus};

use crate::{Core, Fanout, IdentityResolver};

#[derive(Debug, Clone)]
pub enum Delivery {
    Conversation(Uuid, GatewayEvent),
    User(Uuid, GatewayEvent),
}

/// Fanout that remembers every event in publish order.
#[derive(Default)]
pub struct RecordingFanout {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingFanout {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl Fanout for RecordingFanout {
    fn publish_to_conversation(&self, conversation_id: Uuid, event: GatewayEvent) {
        self.deliveries
            .lock()
            .unwrap()
            .push(Delivery::Conversation(conversation_id, event));
    }

    fn notify_user(&self, user_id: Uuid, event: GatewayEvent) {
        self.deliveries.lock().unwrap().push(Delivery::User(user_id, event));
    }
}

pub struct Fixture {
    pub db: Arc<Database>,
    pub fanout: Arc<RecordingFanout>,
    pub core: Core,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let fanout = Arc::new(RecordingFanout::default());
        let core = Core::new(db.clone(), fanout.clone(), IdentityResolver::new("test-secret", 7));
        Self { db, fanout, core }
    }

    pub fn store(&self) -> &dyn Store {
        &*self.db
    }

    pub fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", id);
        self.db
            .insert_user(&NewUser {
                id,
                name,
                email: &email,
                password_hash: "not-a-real-hash",
                created_at: crate::timestamp(),
            })
            .unwrap();
        id
    }

    pub fn book(&self, owner_id: Uuid) -> Uuid {
        let book = Book {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            genre: "Sci-Fi".into(),
            condition: "Good".into(),
            location: "Remote".into(),
            image_url: String::new(),
            owner_id,
            status: BookStatus::Available,
            created_at: crate::timestamp(),
        };
        self.db.insert_book(&book).unwrap();
        book.id
    }

    /// Ledger row only, skipping the conversation the ledger would open.
    pub fn exchange_without_conversation(&self, book_id: Uuid, requester_id: Uuid, owner_id: Uuid) -> Uuid {
        let exchange = Exchange {
            id: Uuid::new_v4(),
            book_id,
            requester_id,
            owner_id,
            message: String::new(),
            status: ExchangeStatus::Requested,
            created_at: crate::timestamp(),
            accepted_at: None,
            declined_at: None,
        };
        self.db.insert_exchange(&exchange).unwrap();
        exchange.id
    }

    /// Owner, requester and the conversation the request opened:
    /// returns (conversation_id, requester, owner).
    pub fn opened_conversation(&self) -> (Uuid, Uuid, Uuid) {
        let owner = self.user("Owner");
        let requester = self.user("Requester");
        let book = self.book(owner);
        let (_, conversation) = self.core.ledger.create_exchange(book, requester, "hi").unwrap();
        (conversation.id, requester, owner)
    }
}
