use uuid::Uuid;

use bookloop_types::events::GatewayEvent;

/// Realtime delivery as seen from the core. Implementations must not block:
/// the relay calls `publish_to_conversation` while holding the conversation's
/// ordering lock.
pub trait Fanout: Send + Sync {
    /// Deliver to every connection in the conversation room.
    fn publish_to_conversation(&self, conversation_id: Uuid, event: GatewayEvent);

    /// Deliver to every connection in the user's identity room.
    fn notify_user(&self, user_id: Uuid, event: GatewayEvent);
}

/// Drops every event. For tools and tests that run without a gateway.
pub struct NoopFanout;

impl Fanout for NoopFanout {
    fn publish_to_conversation(&self, _conversation_id: Uuid, _event: GatewayEvent) {}

    fn notify_user(&self, _user_id: Uuid, _event: GatewayEvent) {}
}
