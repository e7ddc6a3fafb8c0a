use axum::extract::Path;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use bookloop_core::CoreError;
use bookloop_types::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg)
            | CoreError::InvalidOperation(msg)
            | CoreError::InvalidState(msg) => Self::BadRequest(msg),
            CoreError::Unauthorized(msg) => Self::Unauthorized(msg),
            CoreError::Forbidden(msg) => Self::Forbidden(msg),
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::Conflict(msg) => Self::Conflict(msg),
            CoreError::Store(e) => Self::Internal(format!("{:#}", e)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// An id segment that is not a UUID names nothing, so it gets the same 404
/// body as an id that parses but is unknown.
pub fn path_id(path: Result<Path<Uuid>, PathRejection>, what: &str) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id).map_err(|rejection| {
        debug!("Unusable {} id in path: {}", what, rejection.body_text());
        ApiError::NotFound(format!("{} not found", what))
    })
}

/// Conversation-scoped lookups answer "not yours" exactly like "not there".
pub fn conceal(err: CoreError) -> ApiError {
    match err {
        CoreError::Forbidden(_) => ApiError::NotFound("Conversation not found".into()),
        other => other.into(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(detail) => {
                error!("{}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}
