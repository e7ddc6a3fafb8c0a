use axum::{
    Extension, Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use bookloop_types::api::{CreateExchangeRequest, CreateExchangeResponse};

use crate::error::{ApiError, path_id};
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

pub async fn create_exchange(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<CreateExchangeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let book_id = req.book_id.ok_or_else(|| ApiError::bad_request("Missing bookId"))?;

    let ledger = state.core.ledger.clone();
    let (exchange, conversation) =
        run_blocking(move || ledger.create_exchange(book_id, user_id, &req.message)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateExchangeResponse {
            exchange,
            conversation,
        }),
    ))
}

pub async fn list_exchanges(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let ledger = state.core.ledger.clone();
    let exchanges = run_blocking(move || ledger.list_for(user_id)).await?;
    Ok(Json(exchanges))
}

pub async fn accept_exchange(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(path, "Exchange")?;
    let ledger = state.core.ledger.clone();
    let exchange = run_blocking(move || ledger.accept(id, user_id)).await?;
    Ok(Json(exchange))
}

pub async fn decline_exchange(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(path, "Exchange")?;
    let ledger = state.core.ledger.clone();
    let exchange = run_blocking(move || ledger.decline(id, user_id)).await?;
    Ok(Json(exchange))
}
