pub mod conversations;
pub mod error;
pub mod fanout;
pub mod gate;
pub mod identity;
pub mod ledger;
pub mod relay;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use bookloop_db::Store;

pub use conversations::Conversations;
pub use error::{CoreError, CoreResult};
pub use fanout::{Fanout, NoopFanout};
pub use identity::IdentityResolver;
pub use ledger::ExchangeLedger;
pub use relay::{MessageRelay, Sender};

/// The exchange and messaging services wired over one store and one fanout.
#[derive(Clone)]
pub struct Core {
    pub store: Arc<dyn Store>,
    pub identity: IdentityResolver,
    pub conversations: Conversations,
    pub ledger: ExchangeLedger,
    pub relay: MessageRelay,
}

impl Core {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<dyn Fanout>, identity: IdentityResolver) -> Self {
        let conversations = Conversations::new(store.clone());
        let ledger = ExchangeLedger::new(store.clone(), fanout.clone());
        let relay = MessageRelay::new(store.clone(), conversations.clone(), fanout);
        Self {
            store,
            identity,
            conversations,
            ledger,
            relay,
        }
    }
}

/// Current time at the precision the store keeps (microseconds), so values
/// compare equal after a round trip.
pub fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
