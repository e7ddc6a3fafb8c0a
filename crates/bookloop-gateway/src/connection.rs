use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use tokio::task::JoinHandle;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use bookloop_core::{Core, Sender};
use bookloop_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{ConnId, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a connection needs to serve commands.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub core: Core,
    /// Accept `sendConversationMessage` from connections with no identity.
    pub allow_anonymous: bool,
}

/// Serve one WebSocket connection until the client leaves or stops
/// answering pings. Connections start unidentified; `identify` joins the
/// user's identity room.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut events_rx) = ctx.dispatcher.register();

    info!("Connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client commands -> rooms and relay
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_ctx, conn_id, cmd);
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("Connection {} bad command: {} -- raw: {}", conn_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.dispatcher.disconnect(conn_id);
    info!("Connection {} closed", conn_id);
}

/// Applies one client command. Sends hand back the detached persist task.
fn handle_command(ctx: &GatewayContext, conn_id: ConnId, cmd: GatewayCommand) -> Option<JoinHandle<()>> {
    match cmd {
        GatewayCommand::Identify { token } => match ctx.core.identity.resolve(&token) {
            Ok(user_id) => {
                ctx.dispatcher.identify(conn_id, user_id);
                ctx.dispatcher
                    .send_to_connection(conn_id, GatewayEvent::Ready { user_id });
                info!("Connection {} identified as {}", conn_id, user_id);
            }
            Err(e) => debug!("Connection {} identify ignored: {}", conn_id, e),
        },

        GatewayCommand::JoinConversation { conversation_id } => {
            ctx.dispatcher.join_conversation(conn_id, conversation_id);
            trace!("Connection {} joined conversation {}", conn_id, conversation_id);
        }

        GatewayCommand::LeaveConversation { conversation_id } => {
            ctx.dispatcher.leave_conversation(conn_id, conversation_id);
            trace!("Connection {} left conversation {}", conn_id, conversation_id);
        }

        GatewayCommand::SendConversationMessage {
            token,
            text,
            conversation_id,
        } => {
            let Some(sender) = resolve_sender(ctx, conn_id, token.as_deref()) else {
                warn!(
                    "Connection {} tried to post to {} without an identity, dropped",
                    conn_id, conversation_id
                );
                return None;
            };

            // Detached so the write completes even if the socket goes away.
            let relay = ctx.core.relay.clone();
            return Some(tokio::task::spawn_blocking(move || {
                if let Err(e) = relay.send(conversation_id, sender, &text) {
                    warn!(
                        "Realtime message to {} from connection {} rejected: {}",
                        conversation_id, conn_id, e
                    );
                }
            }));
        }
    }
    None
}

/// Payload token wins, then the connection's identity, then the anonymous
/// sender when allowed.
fn resolve_sender(ctx: &GatewayContext, conn_id: ConnId, token: Option<&str>) -> Option<Sender> {
    let from_token = token.and_then(|t| match ctx.core.identity.resolve(t) {
        Ok(user_id) => Some(user_id),
        Err(e) => {
            debug!("Connection {} sent an unusable message token: {}", conn_id, e);
            None
        }
    });

    match from_token.or_else(|| ctx.dispatcher.identity_of(conn_id)) {
        Some(user_id) => Some(Sender::User(user_id)),
        None if ctx.allow_anonymous => Some(Sender::Anonymous),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookloop_core::{IdentityResolver, NoopFanout};
    use bookloop_db::models::NewUser;
    use bookloop_db::{BookRepo, ConversationRepo, Database, UserRepo};
    use bookloop_types::models::{Book, BookStatus};

    fn context(allow_anonymous: bool) -> GatewayContext {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new();
        let core = Core::new(db, Arc::new(NoopFanout), IdentityResolver::new("gateway-test", 1));
        GatewayContext {
            dispatcher,
            core,
            allow_anonymous,
        }
    }

    #[test]
    fn payload_token_beats_connection_identity() {
        let ctx = context(false);
        let (conn, _rx) = ctx.dispatcher.register();
        let (identified, from_token) = (Uuid::new_v4(), Uuid::new_v4());
        ctx.dispatcher.identify(conn, identified);
        let token = ctx.core.identity.issue(from_token).unwrap();

        assert_eq!(
            resolve_sender(&ctx, conn, Some(&token)),
            Some(Sender::User(from_token))
        );
        assert_eq!(
            resolve_sender(&ctx, conn, Some("garbage")),
            Some(Sender::User(identified))
        );
        assert_eq!(resolve_sender(&ctx, conn, None), Some(Sender::User(identified)));
    }

    #[test]
    fn unidentified_senders_depend_on_configuration() {
        let strict = context(false);
        let (conn, _rx) = strict.dispatcher.register();
        assert_eq!(resolve_sender(&strict, conn, None), None);

        let lenient = context(true);
        let (conn, _rx) = lenient.dispatcher.register();
        assert_eq!(resolve_sender(&lenient, conn, Some("garbage")), Some(Sender::Anonymous));
    }

    #[test]
    fn identify_sends_ready_only_for_valid_tokens() {
        let ctx = context(false);
        let (conn, mut rx) = ctx.dispatcher.register();

        handle_command(&ctx, conn, GatewayCommand::Identify { token: "nope".into() });
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.dispatcher.identity_of(conn), None);

        let user_id = Uuid::new_v4();
        let token = ctx.core.identity.issue(user_id).unwrap();
        handle_command(&ctx, conn, GatewayCommand::Identify { token });
        match rx.try_recv() {
            Ok(GatewayEvent::Ready { user_id: ready }) => assert_eq!(ready, user_id),
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(ctx.dispatcher.identity_of(conn), Some(user_id));
    }

    #[test]
    fn join_and_leave_commands_update_rooms() {
        let ctx = context(false);
        let (conn, _rx) = ctx.dispatcher.register();
        let conversation_id = Uuid::new_v4();

        handle_command(&ctx, conn, GatewayCommand::JoinConversation { conversation_id });
        assert_eq!(ctx.dispatcher.conversation_members(conversation_id), 1);
        handle_command(&ctx, conn, GatewayCommand::LeaveConversation { conversation_id });
        assert_eq!(ctx.dispatcher.conversation_members(conversation_id), 0);
    }

    /// Context whose relay publishes through the dispatcher, plus a
    /// conversation opened by an exchange. Returns (ctx, db, conversation,
    /// owner, requester).
    fn wired_context() -> (GatewayContext, Arc<Database>, Uuid, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new();
        let core = Core::new(
            db.clone(),
            Arc::new(dispatcher.clone()),
            IdentityResolver::new("gateway-test", 1),
        );

        let mut ids = Vec::new();
        for name in ["Owner", "Requester"] {
            let id = Uuid::new_v4();
            let email = format!("{}@example.com", id);
            db.insert_user(&NewUser {
                id,
                name,
                email: &email,
                password_hash: "x",
                created_at: bookloop_core::timestamp(),
            })
            .unwrap();
            ids.push(id);
        }
        let (owner, requester) = (ids[0], ids[1]);
        let book = Book {
            id: Uuid::new_v4(),
            title: "Middlemarch".into(),
            author: "George Eliot".into(),
            genre: "Classic".into(),
            condition: "Good".into(),
            location: "Remote".into(),
            image_url: String::new(),
            owner_id: owner,
            status: BookStatus::Available,
            created_at: bookloop_core::timestamp(),
        };
        db.insert_book(&book).unwrap();
        let (_, conversation) = core.ledger.create_exchange(book.id, requester, "hi").unwrap();

        let ctx = GatewayContext {
            dispatcher,
            core,
            allow_anonymous: false,
        };
        (ctx, db, conversation.id, owner, requester)
    }

    fn send(conversation_id: Uuid, text: &str) -> GatewayCommand {
        GatewayCommand::SendConversationMessage {
            token: None,
            text: text.into(),
            conversation_id,
        }
    }

    #[tokio::test]
    async fn realtime_send_persists_and_reaches_the_room() {
        let (ctx, db, conversation_id, owner, requester) = wired_context();

        let (owner_conn, mut owner_rx) = ctx.dispatcher.register();
        ctx.dispatcher.identify(owner_conn, owner);
        handle_command(&ctx, owner_conn, GatewayCommand::JoinConversation { conversation_id });
        let (requester_conn, _requester_rx) = ctx.dispatcher.register();
        ctx.dispatcher.identify(requester_conn, requester);

        handle_command(&ctx, requester_conn, send(conversation_id, "over the wire"))
            .unwrap()
            .await
            .unwrap();

        let history = ctx.core.relay.history(conversation_id, owner).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "over the wire");
        assert_eq!(history[0].sender_id, requester);

        let stored = db.conversation_by_id(conversation_id).unwrap().unwrap();
        assert_eq!(stored.unread_for(owner), 1);
        assert_eq!(stored.unread_for(requester), 0);

        match owner_rx.try_recv() {
            Ok(GatewayEvent::ConversationMessage(m)) => assert_eq!(m.id, history[0].id),
            other => panic!("expected conversation message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn realtime_send_survives_disconnect() {
        let (ctx, _db, conversation_id, owner, requester) = wired_context();

        let (owner_conn, owner_rx) = ctx.dispatcher.register();
        ctx.dispatcher.identify(owner_conn, owner);
        ctx.dispatcher.join_conversation(owner_conn, conversation_id);
        let (requester_conn, requester_rx) = ctx.dispatcher.register();
        ctx.dispatcher.identify(requester_conn, requester);

        let persist = handle_command(&ctx, requester_conn, send(conversation_id, "sent then gone")).unwrap();
        ctx.dispatcher.disconnect(requester_conn);
        ctx.dispatcher.disconnect(owner_conn);
        drop(requester_rx);
        drop(owner_rx);
        persist.await.unwrap();

        let history = ctx.core.relay.history(conversation_id, owner).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "sent then gone");
    }

    #[tokio::test]
    async fn unidentified_realtime_send_is_dropped() {
        let (ctx, _db, conversation_id, owner, _) = wired_context();
        let (conn, _rx) = ctx.dispatcher.register();

        assert!(handle_command(&ctx, conn, send(conversation_id, "who am I")).is_none());
        assert!(ctx.core.relay.history(conversation_id, owner).unwrap().is_empty());
    }
}
