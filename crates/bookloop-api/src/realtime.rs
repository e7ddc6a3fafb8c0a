use axum::{
    Json,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use bookloop_gateway::handle_connection;
use bookloop_types::api::OnlineUsersResponse;

use crate::state::AppState;

/// Connections authenticate in-band with `identify`, so the upgrade itself is open.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let ctx = state.gateway_context();
    ws.on_upgrade(move |socket| handle_connection(socket, ctx))
}

/// Who currently holds an identified gateway connection.
pub async fn online_users(State(state): State<AppState>) -> impl IntoResponse {
    Json(OnlineUsersResponse {
        online: state.dispatcher.online_users(),
    })
}
