use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use bookloop_core::CoreError;
use bookloop_db::models::NewUser;
use bookloop_types::api::{AuthResponse, LoginRequest, PublicUser, SignupRequest, UpdateProfileRequest};

use crate::error::{ApiError, path_id};
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Missing fields"));
    }

    let core = state.core.clone();
    let user = run_blocking(move || {
        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        let id = Uuid::new_v4();
        let inserted = core.store.insert_user(&NewUser {
            id,
            name: &name,
            email: &email,
            password_hash: &password_hash,
            created_at: bookloop_core::timestamp(),
        })?;
        if !inserted {
            return Err(CoreError::Conflict("Email already exists".into()));
        }

        core.store
            .user_by_id(id)?
            .ok_or_else(|| CoreError::Store(anyhow::anyhow!("user {} vanished after insert", id)))
    })
    .await?;

    let token = state
        .core
        .identity
        .issue(user.id)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {:#}", e)))?;

    info!("User {} signed up", user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Missing fields"));
    }

    let core = state.core.clone();
    let user = run_blocking(move || {
        let invalid = || CoreError::Unauthorized("Invalid credentials".into());
        let credentials = core.store.credentials_by_email(&email)?.ok_or_else(invalid)?;

        // Verify password
        let parsed_hash = PasswordHash::new(&credentials.password_hash)
            .map_err(|e| anyhow::anyhow!("stored hash for {} unreadable: {}", credentials.user.id, e))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| invalid())?;

        Ok(credentials.user)
    })
    .await?;

    let token = state
        .core
        .identity
        .issue(user.id)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {:#}", e)))?;

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let user = run_blocking(move || {
        core.store
            .user_by_id(user_id)?
            .ok_or_else(|| CoreError::not_found("User not found"))
    })
    .await?;

    Ok(Json(PublicUser::from(user)))
}

pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let users = run_blocking(move || Ok(core.store.list_users()?)).await?;

    Ok(Json(users.into_iter().map(PublicUser::from).collect::<Vec<_>>()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = path_id(path, "User")?;
    if id != user_id {
        return Err(ApiError::Forbidden("You can only edit your own profile".into()));
    }
    let Json(req) = payload?;

    // An empty name keeps the current one; an empty bio clears it.
    let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let bio = req.bio;

    let core = state.core.clone();
    let user = run_blocking(move || {
        core.store
            .update_profile(id, name.as_deref(), bio.as_deref())?
            .ok_or_else(|| CoreError::not_found("User not found"))
    })
    .await?;

    Ok(Json(PublicUser::from(user)))
}
