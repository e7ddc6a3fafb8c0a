use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};

use bookloop_core::CoreError;
use bookloop_types::api::{FavoritesResponse, ToggleFavoriteRequest};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

/// Adds the book to the caller's favorites, or removes it if already there.
pub async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<ToggleFavoriteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let book_id = req.book_id.ok_or_else(|| ApiError::bad_request("Missing bookId"))?;

    let core = state.core.clone();
    let favorites = run_blocking(move || {
        if core.store.user_by_id(user_id)?.is_none() {
            return Err(CoreError::not_found("User not found"));
        }
        Ok(core.store.toggle_favorite(user_id, book_id)?)
    })
    .await?;

    Ok(Json(FavoritesResponse { favorites }))
}

/// The caller's favorite books that still exist.
pub async fn list_favorites(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let books = run_blocking(move || {
        let user = core
            .store
            .user_by_id(user_id)?
            .ok_or_else(|| CoreError::not_found("User not found"))?;
        Ok(core.store.books_by_ids(&user.favorites)?)
    })
    .await?;

    Ok(Json(books))
}
