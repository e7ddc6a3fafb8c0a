use axum::{
    Extension, Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use bookloop_core::Sender;
use bookloop_types::api::{CreateConversationRequest, SendMessageRequest, SuccessResponse};

use crate::error::{ApiError, conceal, path_id};
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

/// Opens (or returns) the private chat with another user about a book.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (Some(other_user_id), Some(book_id)) = (req.other_user_id, req.book_id) else {
        return Err(ApiError::bad_request("Missing otherUserId or bookId"));
    };

    let conversations = state.core.conversations.clone();
    let conversation =
        run_blocking(move || conversations.open(user_id, other_user_id, book_id)).await?;

    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.core.conversations.clone();
    let summaries = run_blocking(move || conversations.list_for(user_id)).await?;
    Ok(Json(summaries))
}

pub async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = path_id(path, "Conversation")?;
    let relay = state.core.relay.clone();
    let messages = run_blocking(move || Ok(relay.history(conversation_id, user_id)))
        .await?
        .map_err(conceal)?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = path_id(path, "Conversation")?;
    let Json(req) = payload?;

    let relay = state.core.relay.clone();
    let message = run_blocking(move || Ok(relay.send(conversation_id, Sender::User(user_id), &req.text)))
        .await?
        .map_err(conceal)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = path_id(path, "Conversation")?;
    let conversations = state.core.conversations.clone();
    run_blocking(move || Ok(conversations.mark_read(conversation_id, user_id)))
        .await?
        .map_err(conceal)?;
    Ok(Json(SuccessResponse::ok()))
}
