use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, inserted by `require_auth`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

/// Extract and validate the bearer token from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing token".into()))?;

    let user_id = state.core.identity.resolve(auth_header)?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
