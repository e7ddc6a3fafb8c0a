use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Exchange, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms the connection joined its identity room
    Ready { user_id: Uuid },

    /// A message was appended to a conversation
    ConversationMessage(Message),

    /// Someone asked for one of your books
    ExchangeRequest(Exchange),

    /// The owner accepted your request
    ExchangeAccepted(Exchange),

    /// The owner declined your request
    ExchangeDeclined(Exchange),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Join the identity room of the token's user
    Identify { token: String },

    /// Start receiving messages for a conversation
    JoinConversation { conversation_id: Uuid },

    /// Stop receiving messages for a conversation
    LeaveConversation { conversation_id: Uuid },

    /// Post a message through the realtime path
    SendConversationMessage {
        #[serde(default)]
        token: Option<String>,
        text: String,
        conversation_id: Uuid,
    },
}
