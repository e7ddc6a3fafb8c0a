use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection}},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use bookloop_core::CoreError;
use bookloop_types::api::{CreateBookRequest, SuccessResponse, UpdateBookRequest};
use bookloop_types::models::{Book, BookStatus};

use crate::error::{ApiError, path_id};
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

#[derive(Debug, Default, Deserialize)]
pub struct BookQuery {
    pub genre: Option<String>,
    pub status: Option<String>,
    /// Case-insensitive match on title or author.
    pub q: Option<String>,
}

struct BookFilter {
    genre: Option<String>,
    status: Option<BookStatus>,
    needle: Option<String>,
}

impl BookFilter {
    fn parse(query: BookQuery) -> Result<Self, ApiError> {
        let status = query
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<BookStatus>())
            .transpose()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        Ok(Self {
            genre: query.genre.filter(|g| !g.is_empty()),
            status,
            needle: query.q.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty()),
        })
    }

    fn matches(&self, book: &Book) -> bool {
        if let Some(genre) = &self.genre {
            if !book.genre.eq_ignore_ascii_case(genre) {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != book.status) {
            return false;
        }
        match &self.needle {
            Some(needle) => {
                book.title.to_lowercase().contains(needle) || book.author.to_lowercase().contains(needle)
            }
            None => true,
        }
    }
}

/// Public catalogue, newest first.
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<BookQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = BookFilter::parse(query)?;

    let core = state.core.clone();
    let books = run_blocking(move || Ok(core.store.list_books()?)).await?;

    Ok(Json(books.into_iter().filter(|b| filter.matches(b)).collect::<Vec<_>>()))
}

pub async fn create_book(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<CreateBookRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let title = req.title.trim().to_string();
    let author = req.author.trim().to_string();
    if title.is_empty() || author.is_empty() {
        return Err(ApiError::bad_request("Missing title/author"));
    }

    let or_default = |value: Option<String>, default: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    let book = Book {
        id: Uuid::new_v4(),
        title,
        author,
        genre: or_default(req.genre, "General"),
        condition: or_default(req.condition, "Good"),
        location: or_default(req.location, "Remote"),
        image_url: req.image_url.unwrap_or_default(),
        owner_id: user_id,
        status: BookStatus::Available,
        created_at: bookloop_core::timestamp(),
    };

    let core = state.core.clone();
    let book = run_blocking(move || {
        core.store.insert_book(&book)?;
        Ok(book)
    })
    .await?;

    info!("Book {} listed by {}", book.id, user_id);

    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<UpdateBookRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(path, "Book")?;
    let Json(req) = payload?;

    let core = state.core.clone();
    let book = run_blocking(move || {
        let mut book = owned_book(&core, id, user_id)?;
        req.apply(&mut book);
        if book.title.trim().is_empty() || book.author.trim().is_empty() {
            return Err(CoreError::invalid_input("Missing title/author"));
        }
        if !core.store.update_book(&book)? {
            return Err(CoreError::not_found("Book not found"));
        }
        Ok(book)
    })
    .await?;

    Ok(Json(book))
}

pub async fn delete_book(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(path, "Book")?;
    let core = state.core.clone();
    run_blocking(move || {
        owned_book(&core, id, user_id)?;
        if !core.store.delete_book(id)? {
            return Err(CoreError::not_found("Book not found"));
        }
        Ok(())
    })
    .await?;

    info!("Book {} removed by {}", id, user_id);

    Ok(Json(SuccessResponse::ok()))
}

fn owned_book(core: &bookloop_core::Core, id: Uuid, user_id: Uuid) -> Result<Book, CoreError> {
    let book = core
        .store
        .book_by_id(id)?
        .ok_or_else(|| CoreError::not_found("Book not found"))?;
    if book.owner_id != user_id {
        return Err(CoreError::forbidden("Only the owner can change this book"));
    }
    Ok(book)
}
